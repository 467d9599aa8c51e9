//! Web-log event model.
//!
//! Structured events emitted by handlers for the external log plane. Labels
//! are normalized to a small external vocabulary; internal task labels never
//! leak onto the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::TaskLabel;

/// External event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebLogLabel {
    #[serde(rename = "addMessage")]
    AddMessage,
    #[serde(rename = "addMemory")]
    AddMemory,
    #[serde(rename = "updateMemory")]
    UpdateMemory,
    #[serde(rename = "knowledgeBaseUpdate")]
    KnowledgeBaseUpdate,
    #[serde(rename = "mergeMemory")]
    MergeMemory,
    #[serde(rename = "archiveMemory")]
    ArchiveMemory,
}

impl WebLogLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddMessage => "addMessage",
            Self::AddMemory => "addMemory",
            Self::UpdateMemory => "updateMemory",
            Self::KnowledgeBaseUpdate => "knowledgeBaseUpdate",
            Self::MergeMemory => "mergeMemory",
            Self::ArchiveMemory => "archiveMemory",
        }
    }

    /// Normalize an internal task label into the external vocabulary.
    pub fn from_task_label(label: TaskLabel) -> Self {
        match label {
            TaskLabel::Query | TaskLabel::Answer => Self::AddMessage,
            TaskLabel::Add | TaskLabel::MemRead | TaskLabel::PrefAdd => Self::AddMemory,
            TaskLabel::MemoryUpdate | TaskLabel::MemFeedback => Self::UpdateMemory,
            TaskLabel::MemReorganize => Self::MergeMemory,
        }
    }
}

impl std::fmt::Display for WebLogLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the underlying operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Completed,
    Failed,
}

/// Legacy per-memory content entry (local mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContentEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    /// Chat role for addMessage entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// "merged" / "postMerge" for mergeMemory entries.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
}

/// Knowledge-base operation kind (cloud mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KbOperation {
    Add,
    Update,
}

/// One knowledge-base change record (cloud mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbRecord {
    pub log_source: String,
    pub trigger_source: String,
    pub operation: KbOperation,
    pub memory_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_doc_id: Option<String>,
}

impl KbRecord {
    pub fn new(operation: KbOperation, memory_id: impl Into<String>) -> Self {
        Self {
            log_source: "KNOWLEDGE_BASE_LOG".to_string(),
            trigger_source: "Messages".to_string(),
            operation,
            memory_id: memory_id.into(),
            content: None,
            original_content: None,
            source_doc_id: None,
        }
    }

    pub fn with_trigger_source(mut self, trigger_source: impl Into<String>) -> Self {
        self.trigger_source = trigger_source.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_original_content(mut self, original: impl Into<String>) -> Self {
        self.original_content = Some(original.into());
        self
    }

    pub fn with_source_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.source_doc_id = Some(doc_id.into());
        self
    }
}

/// Event body: legacy content entries or knowledge-base records.
///
/// Knowledge records come first in the untagged order: their required fields
/// make them unambiguous, while content entries are all-optional and would
/// otherwise swallow anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogBody {
    Knowledge(Vec<KbRecord>),
    Entries(Vec<LogContentEntry>),
}

impl LogBody {
    pub fn len(&self) -> usize {
        match self {
            Self::Entries(entries) => entries.len(),
            Self::Knowledge(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count used for the `memory_len` field: mergeMemory events exclude the
    /// synthetic postMerge row.
    pub fn memory_len(&self, label: WebLogLabel) -> usize {
        match self {
            Self::Entries(entries) if label == WebLogLabel::MergeMemory => entries
                .iter()
                .filter(|e| e.entry_type.as_deref() != Some("postMerge"))
                .count(),
            body => body.len(),
        }
    }
}

/// A structured event for the external web-log plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebLogEvent {
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub label: WebLogLabel,
    pub from_memory_type: String,
    pub to_memory_type: String,
    pub user_id: String,
    pub mem_cube_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memcube_name: Option<String>,
    pub log_content: String,
    pub memcube_log_content: LogBody,
    /// Per-memory metadata rows; enriched with `memory_time` on drain.
    #[serde(default)]
    pub metadata: Vec<serde_json::Value>,
    pub memory_len: usize,
    #[serde(default)]
    pub status: EventStatus,
    pub timestamp: DateTime<Utc>,
}

/// Memory-type labels used in event envelopes.
pub const USER_INPUT_TYPE: &str = "UserInput";
pub const LONG_TERM_MEMORY_TYPE: &str = "LongTermMemory";
pub const WORKING_MEMORY_TYPE: &str = "WorkingMemory";
pub const ACTIVATION_MEMORY_TYPE: &str = "ActivationMemory";
pub const NOT_APPLICABLE_TYPE: &str = "NotApplicable";

impl WebLogEvent {
    pub fn new(
        label: WebLogLabel,
        from_memory_type: &str,
        to_memory_type: &str,
        user_id: impl Into<String>,
        mem_cube_id: impl Into<String>,
        body: LogBody,
    ) -> Self {
        let memory_len = body.memory_len(label);
        Self {
            item_id: Uuid::new_v4().to_string(),
            task_id: None,
            label,
            from_memory_type: from_memory_type.to_string(),
            to_memory_type: to_memory_type.to_string(),
            user_id: user_id.into(),
            mem_cube_id: mem_cube_id.into(),
            memcube_name: None,
            log_content: String::new(),
            memcube_log_content: body,
            metadata: Vec::new(),
            memory_len,
            status: EventStatus::Completed,
            timestamp: Utc::now(),
        }
    }

    pub fn with_task_id(mut self, task_id: Option<String>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_log_content(mut self, content: impl Into<String>) -> Self {
        self.log_content = content.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_memcube_name(mut self, name: impl Into<String>) -> Self {
        self.memcube_name = Some(name.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.status = EventStatus::Failed;
        self
    }
}
