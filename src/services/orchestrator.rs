//! Task orchestration policy.
//!
//! Maps task labels to priority levels. This is the central policy knob:
//! user-facing interactive labels must not wait behind multi-second
//! reorganization jobs, so LEVEL_1 labels bypass the queue and execute
//! inline on the submitting path.

use serde::{Deserialize, Serialize};

use crate::domain::models::TaskLabel;

/// Admission priority of a task label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityLevel {
    /// Executes inline on the caller's path, before `submit_messages` returns.
    Level1 = 1,
    /// Queued, consumed ahead of Level3 work.
    Level2 = 2,
    /// Queued background maintenance.
    Level3 = 3,
}

/// Label → priority policy.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator;

impl Orchestrator {
    pub fn new() -> Self {
        Self
    }

    /// Priority level for a label.
    pub fn priority(&self, label: TaskLabel) -> PriorityLevel {
        match label {
            TaskLabel::Query | TaskLabel::Answer | TaskLabel::Add => PriorityLevel::Level1,
            TaskLabel::MemoryUpdate | TaskLabel::MemFeedback | TaskLabel::PrefAdd => {
                PriorityLevel::Level2
            }
            TaskLabel::MemRead | TaskLabel::MemReorganize => PriorityLevel::Level3,
        }
    }

    /// Whether a label bypasses the queue.
    pub fn is_immediate(&self, label: TaskLabel) -> bool {
        self.priority(label) == PriorityLevel::Level1
    }
}
