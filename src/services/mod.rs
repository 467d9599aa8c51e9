//! Application services for the memloom scheduler.

pub mod activation;
pub mod dispatcher;
pub mod enhancement;
pub mod handlers;
pub mod metrics;
pub mod monitors;
pub mod orchestrator;
pub mod post_processor;
pub mod rate_limit;
pub mod scheduler;
pub mod search_service;
pub mod status_tracker;
pub mod task_queue;
pub mod web_log;

pub use activation::ActivationManager;
pub use dispatcher::{Dispatcher, DispatcherStats, HandlerEntry, RunningTaskInfo};
pub use enhancement::EnhancementPipeline;
pub use handlers::{HandlerContext, MessageHandler};
pub use metrics::{Histogram, HistogramSnapshot, MetricsRegistry};
pub use monitors::{fallback_keywords, IntentResult, MonitorManager};
pub use orchestrator::{Orchestrator, PriorityLevel};
pub use post_processor::{
    dedup_by_embedding, dedup_by_normalized_key, filter_too_short, PostProcessor, Processed,
};
pub use rate_limit::RateLimiter;
pub use scheduler::{MemScheduler, Modules};
pub use search_service::SearchService;
pub use status_tracker::StatusTracker;
pub use task_queue::{QueueSizes, TaskQueue};
pub use web_log::WebLogPlane;
