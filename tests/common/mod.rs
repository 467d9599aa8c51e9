//! Shared test doubles for scheduler integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use memloom::domain::error::{LlmError, StoreError};
use memloom::domain::models::{
    ChatTurn, MemoryItem, MemoryKind, MemoryStatus, ScheduleMessage, TaskLabel,
};
use memloom::domain::ports::{
    ActivationCache, ChatMessage, EdgeDirection, EmbedClient, FeedbackOutcome, FeedbackProcessor,
    FeedbackRequest, GraphEdge, GraphStore, LlmClient, MemCube, MemReader, MetadataFilter,
    PreferenceMemory, SearchRequest, TextMemory,
};

/// Routes prompts to canned responses by substring match.
pub struct RouterLlm {
    rules: Mutex<Vec<(String, String)>>,
}

impl RouterLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(Vec::new()),
        })
    }

    pub fn route(self: &Arc<Self>, needle: &str, response: &str) -> Arc<Self> {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), response.to_string()));
        self.clone()
    }

    /// Canned responses for keyword extraction, intent detection, rerank, and
    /// the unrelated filter, parameterized for simple flows.
    pub fn for_memory_update(
        keywords: &str,
        intent: &str,
        rerank: &str,
        keep: &str,
    ) -> Arc<Self> {
        let llm = Self::new();
        llm.route("Extract the salient keywords", keywords);
        llm.route("decide whether new evidence", intent);
        llm.route("Rank the memories below", rerank);
        llm.route("whether it is related to any of the queries", keep);
        llm
    }
}

#[async_trait]
impl LlmClient for RouterLlm {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let prompt = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let rules = self.rules.lock().unwrap();
        for (needle, response) in rules.iter() {
            if prompt.contains(needle.as_str()) {
                return Ok(response.clone());
            }
        }
        Err(LlmError::Request(format!(
            "no route for prompt: {}",
            &prompt[..prompt.len().min(80)]
        )))
    }
}

/// Deterministic embedder: every distinct text gets its own orthogonal axis.
#[derive(Default)]
pub struct OrthoEmbedder {
    index: Mutex<HashMap<String, usize>>,
}

const EMBED_DIM: usize = 128;

#[async_trait]
impl EmbedClient for OrthoEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut index = self.index.lock().unwrap();
        Ok(texts
            .iter()
            .map(|text| {
                let next = index.len();
                let axis = *index.entry(text.clone()).or_insert(next) % EMBED_DIM;
                let mut vector = vec![0.0; EMBED_DIM];
                vector[axis] = 1.0;
                vector
            })
            .collect())
    }
}

/// Graph store over in-memory node metadata and edges.
#[derive(Default)]
pub struct MockGraphStore {
    /// (node id, key, memory_type)
    pub nodes: Mutex<Vec<(String, String, String)>>,
    pub edges: Mutex<Vec<GraphEdge>>,
    pub status_updates: Mutex<Vec<(String, MemoryStatus)>>,
}

impl MockGraphStore {
    pub fn with_node(self: Arc<Self>, id: &str, key: &str, memory_type: &str) -> Arc<Self> {
        self.nodes
            .lock()
            .unwrap()
            .push((id.to_string(), key.to_string(), memory_type.to_string()));
        self
    }

    pub fn with_edge(self: Arc<Self>, from: &str, to: &str, edge_type: &str) -> Arc<Self> {
        self.edges.lock().unwrap().push(GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            edge_type: edge_type.to_string(),
        });
        self
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn get_by_metadata(&self, filters: &[MetadataFilter]) -> Result<Vec<String>, StoreError> {
        let mut wanted_key: Option<String> = None;
        let mut wanted_type: Option<String> = None;
        for filter in filters {
            match filter.field.as_str() {
                "key" => wanted_key = filter.value.as_str().map(String::from),
                "memory_type" => wanted_type = filter.value.as_str().map(String::from),
                _ => {}
            }
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, key, memory_type)| {
                wanted_key.as_deref().is_none_or(|w| w == key)
                    && wanted_type.as_deref().is_none_or(|w| w == memory_type)
            })
            .map(|(id, _, _)| id.clone())
            .collect())
    }

    async fn get_edges(
        &self,
        id: &str,
        edge_type: &str,
        direction: EdgeDirection,
    ) -> Result<Vec<GraphEdge>, StoreError> {
        Ok(self
            .edges
            .lock()
            .unwrap()
            .iter()
            .filter(|edge| {
                edge.edge_type == edge_type
                    && match direction {
                        EdgeDirection::Out => edge.from == id,
                        EdgeDirection::In => edge.to == id,
                    }
            })
            .cloned()
            .collect())
    }

    async fn update_node_status(
        &self,
        id: &str,
        status: MemoryStatus,
        _user_name: &str,
    ) -> Result<(), StoreError> {
        self.status_updates
            .lock()
            .unwrap()
            .push((id.to_string(), status));
        Ok(())
    }
}

/// Text memory with an item store, a working set, and scripted search
/// results (served on the long-term lane).
#[derive(Default)]
pub struct MockTextMemory {
    pub items: Mutex<HashMap<String, MemoryItem>>,
    pub working: Mutex<Vec<MemoryItem>>,
    pub search_results: Mutex<Vec<MemoryItem>>,
    pub graph: Option<Arc<MockGraphStore>>,
    pub replace_calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub refresh_calls: AtomicUsize,
}

impl MockTextMemory {
    pub fn insert_item(&self, item: MemoryItem) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    pub fn set_working(&self, items: Vec<MemoryItem>) {
        *self.working.lock().unwrap() = items;
    }

    pub fn set_search_results(&self, items: Vec<MemoryItem>) {
        *self.search_results.lock().unwrap() = items;
    }

    pub fn working_texts(&self) -> Vec<String> {
        self.working
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.memory.clone())
            .collect()
    }

    pub fn long_term_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.metadata.memory_type == MemoryKind::LongTermMemory)
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl TextMemory for MockTextMemory {
    async fn search(&self, request: SearchRequest) -> Result<Vec<MemoryItem>, StoreError> {
        if request.memory_kind == Some(MemoryKind::LongTermMemory) {
            Ok(self.search_results.lock().unwrap().clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn get(&self, id: &str, _user_name: &str) -> Result<Option<MemoryItem>, StoreError> {
        Ok(self.items.lock().unwrap().get(id).cloned())
    }

    async fn add(
        &self,
        items: Vec<MemoryItem>,
        _user_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut store = self.items.lock().unwrap();
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(item.id.clone());
            store.insert(item.id.clone(), item);
        }
        Ok(ids)
    }

    async fn delete(&self, ids: &[String], _user_name: &str) -> Result<(), StoreError> {
        let mut store = self.items.lock().unwrap();
        for id in ids {
            store.remove(id);
            self.deleted.lock().unwrap().push(id.clone());
        }
        Ok(())
    }

    async fn get_working_memory(&self, _user_name: &str) -> Result<Vec<MemoryItem>, StoreError> {
        Ok(self.working.lock().unwrap().clone())
    }

    async fn replace_working_memory(&self, items: Vec<MemoryItem>) -> Result<(), StoreError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        *self.working.lock().unwrap() = items;
        Ok(())
    }

    async fn add_raw_file_nodes(
        &self,
        raw_items: Vec<MemoryItem>,
        _enhanced_ids: &[String],
        _user_id: &str,
        _user_name: &str,
    ) -> Result<(), StoreError> {
        let mut store = self.items.lock().unwrap();
        for item in raw_items {
            store.insert(item.id.clone(), item);
        }
        Ok(())
    }

    async fn remove_and_refresh(&self, _user_name: &str) -> Result<(), StoreError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn graph_store(&self) -> Option<Arc<dyn GraphStore>> {
        self.graph
            .clone()
            .map(|graph| graph as Arc<dyn GraphStore>)
    }
}

/// A mem cube over the mock stores.
pub struct MockCube {
    pub cube_name: String,
    pub text: Arc<MockTextMemory>,
    pub activation: Option<Arc<dyn ActivationCache>>,
    pub preferences: Option<Arc<dyn PreferenceMemory>>,
}

impl MockCube {
    pub fn new(name: &str, text: Arc<MockTextMemory>) -> Arc<Self> {
        Arc::new(Self {
            cube_name: name.to_string(),
            text,
            activation: None,
            preferences: None,
        })
    }
}

impl MemCube for MockCube {
    fn name(&self) -> String {
        self.cube_name.clone()
    }

    fn text_mem(&self) -> Arc<dyn TextMemory> {
        self.text.clone() as Arc<dyn TextMemory>
    }

    fn act_mem(&self) -> Option<Arc<dyn ActivationCache>> {
        self.activation.clone()
    }

    fn pref_mem(&self) -> Option<Arc<dyn PreferenceMemory>> {
        self.preferences.clone()
    }
}

/// Reader that enriches each raw item into one long-term item with a stable
/// id derived from the raw id.
#[derive(Default)]
pub struct EchoMemReader;

#[async_trait]
impl MemReader for EchoMemReader {
    async fn fine_transfer(
        &self,
        items: Vec<MemoryItem>,
        _custom_tags: Option<Vec<String>>,
        _user_name: &str,
        _chat_history: Option<Vec<ChatTurn>>,
        _user_context: Option<serde_json::Value>,
    ) -> Result<Vec<Vec<MemoryItem>>, StoreError> {
        Ok(items
            .into_iter()
            .map(|raw| {
                let mut enriched = MemoryItem::new(format!("fine: {}", raw.memory))
                    .with_kind(MemoryKind::LongTermMemory);
                enriched.id = format!("fine-{}", raw.id);
                enriched.metadata.merged_from = raw.metadata.merged_from.clone();
                vec![enriched]
            })
            .collect())
    }
}

/// Feedback processor returning a fixed outcome.
pub struct FixedFeedback {
    pub outcome: FeedbackOutcome,
}

#[async_trait]
impl FeedbackProcessor for FixedFeedback {
    async fn process(
        &self,
        _user_id: &str,
        _user_name: &str,
        _request: FeedbackRequest,
    ) -> Result<FeedbackOutcome, StoreError> {
        Ok(self.outcome.clone())
    }
}

/// Build a memory item with a key and kind.
pub fn item_with_key(id: &str, memory: &str, key: &str, kind: MemoryKind) -> MemoryItem {
    let mut item = MemoryItem::new(memory).with_key(key).with_kind(kind);
    item.id = id.to_string();
    item
}

/// Build a plain schedule message.
pub fn message(user: &str, cube: &str, label: TaskLabel, content: &str) -> ScheduleMessage {
    ScheduleMessage::new(user, cube, label, content)
}

/// Poll `condition` until it returns true or the timeout elapses.
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
