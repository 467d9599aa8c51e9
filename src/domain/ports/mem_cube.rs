//! Mem-cube ports.
//!
//! A mem-cube bundles a text-memory graph, an optional activation cache, and
//! optional preference memory for one tenant. Handlers mutate cubes only
//! through these traits; the cube owns its locking and is treated as a
//! thread-safe facade.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::error::StoreError;
use crate::domain::models::{ChatTurn, MemoryItem, MemoryKind};

use super::graph_store::GraphStore;

/// Search mode: fast (raw chunks) or fine (enhanced items).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    Fast,
    Fine,
}

/// Parameters for a text-memory search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub user_name: String,
    pub top_k: usize,
    pub mode: SearchMode,
    /// Restrict to one partition; `None` searches all.
    pub memory_kind: Option<MemoryKind>,
    pub filters: HashMap<String, serde_json::Value>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, user_name: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            user_name: user_name.into(),
            top_k,
            mode: SearchMode::Fast,
            memory_kind: None,
            filters: HashMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.memory_kind = Some(kind);
        self
    }
}

/// Port over a cube's text-memory graph.
#[async_trait]
pub trait TextMemory: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<MemoryItem>, StoreError>;

    async fn get(&self, id: &str, user_name: &str) -> Result<Option<MemoryItem>, StoreError>;

    /// Add items, returning their assigned ids in order.
    async fn add(&self, items: Vec<MemoryItem>, user_name: &str) -> Result<Vec<String>, StoreError>;

    async fn delete(&self, ids: &[String], user_name: &str) -> Result<(), StoreError>;

    async fn get_working_memory(&self, user_name: &str) -> Result<Vec<MemoryItem>, StoreError>;

    /// Replace the working set wholesale, in the given order.
    async fn replace_working_memory(&self, items: Vec<MemoryItem>) -> Result<(), StoreError>;

    /// Attach raw-file nodes and their edges to the given enhanced items.
    async fn add_raw_file_nodes(
        &self,
        raw_items: Vec<MemoryItem>,
        enhanced_ids: &[String],
        user_id: &str,
        user_name: &str,
    ) -> Result<(), StoreError>;

    /// Ask the cube's memory manager to drop stale state and refresh.
    async fn remove_and_refresh(&self, user_name: &str) -> Result<(), StoreError>;

    /// The underlying graph store, when the backend exposes one.
    fn graph_store(&self) -> Option<Arc<dyn GraphStore>>;
}

/// One entry of the activation cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationItem {
    pub id: String,
    /// The assembled prompt this entry was extracted from.
    pub composed_text: String,
    /// The individual working-memory texts that went into the composition.
    pub text_memories: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Port over a cube's activation cache.
#[async_trait]
pub trait ActivationCache: Send + Sync {
    async fn get_all(&self) -> Result<Vec<ActivationItem>, StoreError>;

    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Extract a cache entry from a composed prompt.
    async fn extract(&self, composed_text: &str) -> Result<ActivationItem, StoreError>;

    async fn add(&self, items: Vec<ActivationItem>) -> Result<(), StoreError>;

    /// Persist the cache snapshot to disk.
    async fn dump(&self, path: &Path) -> Result<(), StoreError>;
}

/// Port over a cube's preference memory.
#[async_trait]
pub trait PreferenceMemory: Send + Sync {
    /// Extract preference items from a chat transcript.
    async fn extract(
        &self,
        messages: Vec<ChatTurn>,
        info: HashMap<String, serde_json::Value>,
        user_context: Option<serde_json::Value>,
    ) -> Result<Vec<MemoryItem>, StoreError>;

    /// Add extracted items, returning their ids. Must be idempotent per item.
    async fn add(&self, items: Vec<MemoryItem>) -> Result<Vec<String>, StoreError>;
}

/// Port over the external fine-transfer reader used by the mem_read path.
#[async_trait]
pub trait MemReader: Send + Sync {
    /// Transform raw fast-memory items into enriched item groups.
    async fn fine_transfer(
        &self,
        items: Vec<MemoryItem>,
        custom_tags: Option<Vec<String>>,
        user_name: &str,
        chat_history: Option<Vec<ChatTurn>>,
        user_context: Option<serde_json::Value>,
    ) -> Result<Vec<Vec<MemoryItem>>, StoreError>;

    /// Whether raw-file nodes should be attached after enhancement.
    fn save_rawfile(&self) -> bool {
        false
    }
}

/// One add/update record returned by the feedback processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_doc_id: Option<String>,
}

/// Outcome of processing one feedback payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    #[serde(default)]
    pub add: Vec<FeedbackRecord>,
    #[serde(default)]
    pub update: Vec<FeedbackRecord>,
}

/// Parsed feedback payload handed to the processor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeedbackRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, rename = "history")]
    pub chat_history: Vec<ChatTurn>,
    #[serde(default)]
    pub retrieved_memory_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

/// Port over the external feedback processor.
#[async_trait]
pub trait FeedbackProcessor: Send + Sync {
    async fn process(
        &self,
        user_id: &str,
        user_name: &str,
        request: FeedbackRequest,
    ) -> Result<FeedbackOutcome, StoreError>;
}

/// A per-tenant mem-cube.
pub trait MemCube: Send + Sync {
    /// Human-facing cube name for log events.
    fn name(&self) -> String;

    fn text_mem(&self) -> Arc<dyn TextMemory>;

    fn act_mem(&self) -> Option<Arc<dyn ActivationCache>> {
        None
    }

    fn pref_mem(&self) -> Option<Arc<dyn PreferenceMemory>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_builder() {
        let request = SearchRequest::new("q", "cube1", 5)
            .with_mode(SearchMode::Fine)
            .with_kind(MemoryKind::UserMemory);
        assert_eq!(request.top_k, 5);
        assert_eq!(request.mode, SearchMode::Fine);
        assert_eq!(request.memory_kind, Some(MemoryKind::UserMemory));
    }

    #[test]
    fn test_feedback_request_parses_history_alias() {
        let request: FeedbackRequest = serde_json::from_str(
            r#"{"history": [{"role": "user", "content": "hi"}], "retrieved_memory_ids": ["m1"]}"#,
        )
        .unwrap();
        assert_eq!(request.chat_history.len(), 1);
        assert_eq!(request.retrieved_memory_ids, vec!["m1"]);
    }
}
