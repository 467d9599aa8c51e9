//! Domain layer: models, ports, errors, and model-response parsing.

pub mod error;
pub mod models;
pub mod parse;
pub mod ports;

pub use error::{DomainResult, LlmError, QueueError, SchedulerError, StoreError};
