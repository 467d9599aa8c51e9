//! Task status domain model and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::TaskLabel;

/// Lifecycle state of a scheduled task.
///
/// Transitions: submitted → running → {succeeded | failed};
/// submitted → dropped (stream overflow, non-priority-1 only);
/// any non-terminal → cancelled (best effort).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Dropped,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Dropped | Self::Cancelled
        )
    }

    /// Whether a transition to `next` is allowed.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Submitted, Self::Running | Self::Dropped) => true,
            (Self::Running, Self::Succeeded | Self::Failed) => true,
            (state, Self::Cancelled) => !state.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dropped => "dropped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle record tracked per scheduled message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    /// The message's `item_id`.
    pub task_id: String,
    /// Business-level correlation id, when the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_task_id: Option<String>,
    pub user_id: String,
    pub label: TaskLabel,
    pub mem_cube_id: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskStatusRecord {
    pub fn submitted(
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        label: TaskLabel,
        mem_cube_id: impl Into<String>,
        business_task_id: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            business_task_id,
            user_id: user_id.into(),
            label,
            mem_cube_id: mem_cube_id.into(),
            state: TaskState::Submitted,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }
}
