//! Domain errors for the memloom scheduler.
//!
//! This module defines all error types using thiserror for structured error
//! handling. Each enum covers one collaborator or subsystem boundary.

use thiserror::Error;

/// Errors raised by scheduler-owned state and invariants.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("no mem cube registered for cube id: {0}")]
    MemCubeNotFound(String),

    #[error("invalid task state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("message validation failed: {0}")]
    ValidationFailed(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the task queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Per-stream bound reached with the reject overflow policy.
    #[error("stream {stream_key} is full ({capacity} messages)")]
    StreamFull { stream_key: String, capacity: usize },

    #[error("shared log backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Errors from external model clients (LLM, embedder, reranker).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model request timed out after {0}ms")]
    Timeout(u64),

    #[error("malformed model response: {0}")]
    Malformed(String),
}

/// Errors from storage collaborators (graph store, mem cube, monitor store).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("memory not found: {0}")]
    MemoryNotFound(String),

    #[error("graph store operation failed: {0}")]
    Graph(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Result alias used throughout the domain and service layers.
pub type DomainResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::StreamFull {
            stream_key: "u1:c1:query".to_string(),
            capacity: 10,
        };
        assert_eq!(err.to_string(), "stream u1:c1:query is full (10 messages)");
    }

    #[test]
    fn test_store_error_from_serde() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = StoreError::from(parse_err);
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn test_scheduler_error_from_queue() {
        let err: SchedulerError = QueueError::BackendUnavailable("down".to_string()).into();
        assert!(err.to_string().contains("shared log backend unavailable"));
    }
}
