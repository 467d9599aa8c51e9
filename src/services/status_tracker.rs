//! Task status tracking.
//!
//! Records the lifecycle of every submitted message and enforces the task
//! state machine. Illegal transitions are logged and ignored so a racing
//! cancellation can never corrupt a terminal record.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::{TaskLabel, TaskState, TaskStatusRecord};

/// Tracks per-task lifecycle records, keyed by the message `item_id`.
#[derive(Debug, Default)]
pub struct StatusTracker {
    records: RwLock<HashMap<String, TaskStatusRecord>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly submitted task.
    pub async fn task_submitted(
        &self,
        task_id: &str,
        user_id: &str,
        label: TaskLabel,
        mem_cube_id: &str,
        business_task_id: Option<String>,
    ) {
        let record =
            TaskStatusRecord::submitted(task_id, user_id, label, mem_cube_id, business_task_id);
        self.records
            .write()
            .await
            .insert(task_id.to_string(), record);
    }

    /// Transition a task to `Running`.
    pub async fn task_running(&self, task_id: &str) {
        self.transition(task_id, TaskState::Running, None).await;
    }

    /// Transition a task to `Succeeded`.
    pub async fn task_succeeded(&self, task_id: &str) {
        self.transition(task_id, TaskState::Succeeded, None).await;
    }

    /// Transition a task to `Failed` with an error message.
    pub async fn task_failed(&self, task_id: &str, error: impl Into<String>) {
        self.transition(task_id, TaskState::Failed, Some(error.into()))
            .await;
    }

    /// Transition a task to `Dropped` (queue overflow eviction).
    pub async fn task_dropped(&self, task_id: &str) {
        self.transition(task_id, TaskState::Dropped, Some("stream overflow".to_string()))
            .await;
    }

    /// Best-effort cancellation; does not interrupt in-flight work.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(task_id) {
            Some(record) if record.state.can_transition_to(TaskState::Cancelled) => {
                record.state = TaskState::Cancelled;
                record.finished_at = Some(Utc::now());
                true
            }
            Some(record) => {
                debug!(task_id, state = %record.state, "cancel ignored for terminal task");
                false
            }
            None => false,
        }
    }

    async fn transition(&self, task_id: &str, next: TaskState, error: Option<String>) {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(task_id) else {
            warn!(task_id, next = %next, "status transition for unknown task");
            return;
        };
        if !record.state.can_transition_to(next) {
            warn!(
                task_id,
                from = %record.state,
                to = %next,
                "illegal status transition ignored"
            );
            return;
        }
        record.state = next;
        match next {
            TaskState::Running => record.started_at = Some(Utc::now()),
            state if state.is_terminal() => {
                record.finished_at = Some(Utc::now());
                record.error_message = error;
            }
            _ => {}
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskStatusRecord> {
        self.records.read().await.get(task_id).cloned()
    }

    /// All records for a user, most recently submitted first.
    pub async fn list_for_user(&self, user_id: &str) -> Vec<TaskStatusRecord> {
        let records = self.records.read().await;
        let mut matching: Vec<TaskStatusRecord> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        matching
    }

    /// Count of records currently in the given state.
    pub async fn count_in_state(&self, state: TaskState) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.state == state)
            .count()
    }
}
