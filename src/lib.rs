//! Memloom - memory scheduler for conversational agents
//!
//! The core of a multi-tenant memory system:
//! - Priority-based task admission and per-stream FIFO queueing
//! - Worker-pool dispatch with per-label handlers
//! - Working-memory reconciliation (rerank + filter + replace)
//! - Periodic activation-cache refresh
//! - Status, metrics, and web-log planes

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export the main entry points for convenience
pub use domain::models::{ScheduleMessage, SchedulerConfig, TaskLabel};
pub use services::{MemScheduler, Modules};
