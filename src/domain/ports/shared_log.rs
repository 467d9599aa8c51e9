//! Shared streaming log port.
//!
//! When configured, the task queue and the rate limiter run against a shared
//! log (stream append/read/ack plus a sorted window for rate limiting) so
//! multiple processes observe the same state. The in-process backends are the
//! fallback.

use async_trait::async_trait;

use crate::domain::error::StoreError;

/// One entry read from a stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub stream_key: String,
    /// Backend-assigned entry id, used for acknowledgement.
    pub entry_id: String,
    pub payload: String,
}

/// Port over a shared streaming log.
#[async_trait]
pub trait SharedLogClient: Send + Sync {
    /// Append a payload to a stream; returns the entry id.
    async fn xadd(&self, stream_key: &str, payload: &str) -> Result<String, StoreError>;

    /// Read up to `batch` entries across the given streams, fairly.
    async fn xread(&self, stream_keys: &[String], batch: usize)
        -> Result<Vec<StreamEntry>, StoreError>;

    /// Acknowledge a consumed entry.
    async fn xack(&self, stream_key: &str, entry_id: &str) -> Result<(), StoreError>;

    /// Number of pending entries per stream.
    async fn stream_len(&self, stream_key: &str) -> Result<usize, StoreError>;

    /// Add a scored member to a sorted window (rate limiting).
    async fn window_add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;

    /// Remove window members with score below `min_score`.
    async fn window_trim(&self, key: &str, min_score: f64) -> Result<(), StoreError>;

    /// Count members in a window.
    async fn window_count(&self, key: &str) -> Result<usize, StoreError>;

    /// Expire a window key after `ttl_seconds`.
    async fn window_expire(&self, key: &str, ttl_seconds: u64) -> Result<(), StoreError>;
}
