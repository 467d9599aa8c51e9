//! Scheduler configuration model.
//!
//! All knobs carry serde defaults so a partially specified config file or
//! environment still yields a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How working-memory retrieval searches the tree store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    TreeFast,
    TreeFine,
}

impl Default for SearchMethod {
    fn default() -> Self {
        Self::TreeFast
    }
}

/// Strategy used by the enhancement pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FineStrategy {
    /// Rewrite each memory in place, preserving item identity.
    Rewrite,
    /// Produce fresh long-term items from the model output.
    Recreate,
}

impl Default for FineStrategy {
    fn default() -> Self {
        Self::Rewrite
    }
}

/// How the consumer loop is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerMode {
    /// Consumer runs as a task on the shared runtime.
    Shared,
    /// Consumer runs on a dedicated OS thread with its own runtime.
    Isolated,
}

impl Default for ConsumerMode {
    fn default() -> Self {
        Self::Shared
    }
}

/// Policy when a per-stream queue bound is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message; never blocks callers.
    DropOldest,
    /// Reject the submission.
    Reject,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// When set, logs also go to a daily-rolled file in this directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

/// Monitor snapshot database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Sqlite URL, e.g. `sqlite:memloom.db` or `sqlite::memory:`.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:memloom.db".to_string(),
        }
    }
}

/// Rate-limit window configuration (enforced outside the scheduler core but
/// sharing the scheduler's distributed store when one is configured).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 100,
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_context_window_size() -> usize {
    5
}
fn default_act_mem_dump_path() -> PathBuf {
    PathBuf::from("memloom_act_mem.json")
}
fn default_true() -> bool {
    true
}
fn default_thread_pool_max_workers() -> usize {
    8
}
fn default_consume_interval_seconds() -> f64 {
    0.05
}
fn default_consume_batch() -> usize {
    20
}
fn default_max_internal_queue_size() -> usize {
    10_000
}
fn default_max_web_log_queue_size() -> usize {
    1_000
}
fn default_similarity_threshold() -> f32 {
    0.75
}
fn default_min_length_threshold() -> usize {
    6
}
fn default_query_key_words_limit() -> usize {
    20
}
fn default_max_query_history() -> usize {
    50
}
fn default_batch_size() -> usize {
    10
}
fn default_retries() -> usize {
    2
}
fn default_act_mem_update_interval_seconds() -> u64 {
    300
}
fn default_query_trigger_interval_seconds() -> u64 {
    60
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Working-set bound and default retrieval size.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,
    #[serde(default)]
    pub enable_activation_memory: bool,
    #[serde(default = "default_act_mem_dump_path")]
    pub act_mem_dump_path: PathBuf,
    #[serde(default)]
    pub search_method: SearchMethod,
    #[serde(default)]
    pub fine_strategy: FineStrategy,
    #[serde(default = "default_true")]
    pub enable_parallel_dispatch: bool,
    #[serde(default = "default_thread_pool_max_workers")]
    pub thread_pool_max_workers: usize,
    #[serde(default = "default_consume_interval_seconds")]
    pub consume_interval_seconds: f64,
    #[serde(default = "default_consume_batch")]
    pub consume_batch: usize,
    #[serde(default)]
    pub consumer_mode: ConsumerMode,
    /// Use the shared streaming log backend for the task queue.
    #[serde(default)]
    pub use_shared_log: bool,
    #[serde(default = "default_max_internal_queue_size")]
    pub max_internal_queue_size: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "default_max_web_log_queue_size")]
    pub max_web_log_queue_size: usize,
    #[serde(default = "default_similarity_threshold")]
    pub filter_similarity_threshold: f32,
    #[serde(default = "default_min_length_threshold")]
    pub filter_min_length_threshold: usize,
    #[serde(default = "default_query_key_words_limit")]
    pub query_key_words_limit: usize,
    #[serde(default = "default_max_query_history")]
    pub max_query_history: usize,
    /// Enhancement batch size; batches above this run concurrently.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Extra attempts per enhancement batch after the first.
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_act_mem_update_interval_seconds")]
    pub act_mem_update_interval_seconds: u64,
    #[serde(default = "default_query_trigger_interval_seconds")]
    pub query_trigger_interval_seconds: u64,
    /// Fold per-label events into knowledgeBaseUpdate records (cloud mode).
    #[serde(default)]
    pub cloud_mode: bool,
    /// Labels whose handlers are skipped at submit time.
    #[serde(default)]
    pub disabled_handlers: Vec<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_window_size: default_context_window_size(),
            enable_activation_memory: false,
            act_mem_dump_path: default_act_mem_dump_path(),
            search_method: SearchMethod::default(),
            fine_strategy: FineStrategy::default(),
            enable_parallel_dispatch: true,
            thread_pool_max_workers: default_thread_pool_max_workers(),
            consume_interval_seconds: default_consume_interval_seconds(),
            consume_batch: default_consume_batch(),
            consumer_mode: ConsumerMode::default(),
            use_shared_log: false,
            max_internal_queue_size: default_max_internal_queue_size(),
            overflow_policy: OverflowPolicy::default(),
            max_web_log_queue_size: default_max_web_log_queue_size(),
            filter_similarity_threshold: default_similarity_threshold(),
            filter_min_length_threshold: default_min_length_threshold(),
            query_key_words_limit: default_query_key_words_limit(),
            max_query_history: default_max_query_history(),
            batch_size: default_batch_size(),
            retries: default_retries(),
            act_mem_update_interval_seconds: default_act_mem_update_interval_seconds(),
            query_trigger_interval_seconds: default_query_trigger_interval_seconds(),
            cloud_mode: false,
            disabled_handlers: Vec::new(),
            database: DatabaseConfig::default(),
            logging: LogConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Consumer poll interval as a [`Duration`].
    pub fn consume_interval(&self) -> Duration {
        Duration::from_secs_f64(self.consume_interval_seconds.max(0.0))
    }

    pub fn act_mem_update_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.act_mem_update_interval_seconds).unwrap_or(300))
    }

    pub fn query_trigger_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.query_trigger_interval_seconds).unwrap_or(60))
    }

    pub fn is_handler_disabled(&self, label: &str) -> bool {
        self.disabled_handlers.iter().any(|l| l == label)
    }
}
