//! Schedule message domain model.
//!
//! A [`ScheduleMessage`] is the unit of work flowing through the scheduler:
//! submitted by callers, admitted by priority, queued per stream key, and
//! handed to label handlers in (user, cube, label) groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Task label identifying which handler processes a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLabel {
    Query,
    Answer,
    Add,
    MemoryUpdate,
    MemRead,
    MemReorganize,
    MemFeedback,
    PrefAdd,
}

impl TaskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Answer => "answer",
            Self::Add => "add",
            Self::MemoryUpdate => "memory_update",
            Self::MemRead => "mem_read",
            Self::MemReorganize => "mem_reorganize",
            Self::MemFeedback => "mem_feedback",
            Self::PrefAdd => "pref_add",
        }
    }

    /// All labels, in registry order.
    pub fn all() -> [TaskLabel; 8] {
        [
            Self::Query,
            Self::Answer,
            Self::Add,
            Self::MemoryUpdate,
            Self::MemRead,
            Self::MemReorganize,
            Self::MemFeedback,
            Self::PrefAdd,
        ]
    }
}

impl std::fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single chat turn carried as optional context on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// The unit of work submitted to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleMessage {
    /// Server-assigned unique id; the idempotency key for handlers.
    pub item_id: String,
    /// Business-level correlation id; may span multiple messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub user_id: String,
    pub mem_cube_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub label: TaskLabel,
    /// Opaque payload; JSON string or plain text depending on the label.
    pub content: String,
    /// Submission time (UTC); never regresses once dispatched.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Free-form metadata (trigger_source, custom_tags, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub info: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<ChatTurn>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<serde_json::Value>,
    /// Set by the consumer when the message leaves the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dequeued_at: Option<DateTime<Utc>>,
}

impl ScheduleMessage {
    /// Create a message with a fresh server-assigned `item_id`.
    pub fn new(
        user_id: impl Into<String>,
        mem_cube_id: impl Into<String>,
        label: TaskLabel,
        content: impl Into<String>,
    ) -> Self {
        Self {
            item_id: Uuid::new_v4().to_string(),
            task_id: None,
            user_id: user_id.into(),
            mem_cube_id: mem_cube_id.into(),
            session_id: None,
            user_name: None,
            label,
            content: content.into(),
            timestamp: Utc::now(),
            trace_id: None,
            info: HashMap::new(),
            chat_history: None,
            user_context: None,
            dequeued_at: None,
        }
    }

    /// Set the business-level task id.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Set the session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the user name used for cube-scoped store calls.
    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    /// Attach a free-form info entry.
    pub fn with_info(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.info.insert(key.into(), value);
        self
    }

    /// The stream key this message is ordered under.
    ///
    /// FIFO is guaranteed per stream key only; there is no ordering across
    /// labels for the same user.
    pub fn stream_key(&self) -> String {
        format!("{}:{}:{}", self.user_id, self.mem_cube_id, self.label)
    }

    /// The `user_name` to use for store calls, defaulting to the cube id.
    pub fn effective_user_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.mem_cube_id)
    }

    /// Record the dequeue instant and return the queue wait in milliseconds.
    pub fn mark_dequeued(&mut self, now: DateTime<Utc>) -> u64 {
        self.dequeued_at = Some(now);
        self.queue_wait_ms().unwrap_or(0)
    }

    /// Milliseconds spent between submission and dequeue, if dequeued.
    pub fn queue_wait_ms(&self) -> Option<u64> {
        let dequeued = self.dequeued_at?;
        let wait = dequeued.signed_duration_since(self.timestamp);
        Some(u64::try_from(wait.num_milliseconds().max(0)).unwrap_or(0))
    }
}

/// Group messages by `(user_id, mem_cube_id)`, preserving order within each
/// group. Handlers are invoked once per group.
pub fn group_by_user_and_cube(
    messages: Vec<ScheduleMessage>,
) -> Vec<((String, String), Vec<ScheduleMessage>)> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<ScheduleMessage>> = HashMap::new();
    for msg in messages {
        let key = (msg.user_id.clone(), msg.mem_cube_id.clone());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(msg);
    }
    order
        .into_iter()
        .map(|key| {
            let batch = groups.remove(&key).unwrap_or_default();
            (key, batch)
        })
        .collect()
}
