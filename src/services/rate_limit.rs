//! Sliding-window rate limiting.
//!
//! Enforced outside the scheduler core but sharing its distributed store:
//! when a shared log client is configured the window lives in a sorted set
//! there and is visible across processes; otherwise a per-process keyed
//! limiter is the fallback.

use chrono::Utc;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::domain::models::RateLimitConfig;
use crate::domain::ports::SharedLogClient;

type KeyedLimiter = GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Sliding-window request limiter keyed by caller id.
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    shared: Option<Arc<dyn SharedLogClient>>,
    local: KeyedLimiter,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let max = NonZeroU32::new(config.max_requests.max(1)).expect("max_requests >= 1");
        let window = Duration::from_secs(config.window_seconds.max(1));
        let quota = Quota::with_period(window.checked_div(max.get()).unwrap_or(window))
            .expect("non-zero quota period")
            .allow_burst(max);
        Self {
            window,
            max_requests: max.get(),
            shared: None,
            local: GovernorLimiter::keyed(quota),
        }
    }

    pub fn with_shared_log(config: &RateLimitConfig, shared: Arc<dyn SharedLogClient>) -> Self {
        let mut limiter = Self::new(config);
        limiter.shared = Some(shared);
        limiter
    }

    /// Check whether a request from `key` is admitted within the window.
    ///
    /// Shared-store failures fall back to the in-process limiter so a
    /// degraded store never blocks traffic outright.
    pub async fn check(&self, key: &str) -> bool {
        if let Some(shared) = &self.shared {
            match self.check_shared(shared, key).await {
                Ok(admitted) => return admitted,
                Err(e) => {
                    warn!(key, error = %e, "shared rate-limit window unavailable, using local fallback");
                }
            }
        }
        self.local.check_key(&key.to_string()).is_ok()
    }

    async fn check_shared(
        &self,
        shared: &Arc<dyn SharedLogClient>,
        key: &str,
    ) -> Result<bool, crate::domain::error::StoreError> {
        let window_key = format!("ratelimit:{key}");
        let now = Utc::now();
        let now_score = now.timestamp_millis() as f64;
        let min_score = now_score - self.window.as_millis() as f64;

        shared.window_trim(&window_key, min_score).await?;
        let count = shared.window_count(&window_key).await?;
        if count >= self.max_requests as usize {
            return Ok(false);
        }
        let member = format!("{}:{}", now.timestamp_nanos_opt().unwrap_or_default(), count);
        shared.window_add(&window_key, now_score, &member).await?;
        shared
            .window_expire(&window_key, self.window.as_secs().max(1))
            .await?;
        Ok(true)
    }
}
