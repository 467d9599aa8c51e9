//! Per-(user, cube) query and working-memory monitors.
//!
//! The monitors accumulate observed queries (with extracted keywords) and the
//! current working-set snapshot. State is serialized through the monitor
//! store at read/write boundaries so concurrent handlers for the same user
//! observe a consistent snapshot.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::{
    MemoryItem, QueryHistory, QueryRecord, WorkingMemoryEntry, WorkingSet,
};
use crate::domain::parse::{extract_json_obj, Parsed};
use crate::domain::ports::{
    ChatMessage, Locale, LlmClient, MonitorSnapshot, MonitorStore, PromptStore, TemplateName,
};

/// Outcome of intent detection over a session turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentResult {
    #[serde(default)]
    pub trigger_retrieval: bool,
    #[serde(default)]
    pub missing_evidences: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KeywordResponse {
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Default)]
struct MonitorState {
    queries: HashMap<(String, String), QueryHistory>,
    working: HashMap<(String, String), WorkingSet>,
}

/// Monitor coordinator: keyword extraction, intent detection, timed triggers,
/// and the per-(user, cube) monitor state.
pub struct MonitorManager {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<dyn PromptStore>,
    store: Option<Arc<dyn MonitorStore>>,
    state: RwLock<MonitorState>,
    max_query_history: usize,
    pub query_trigger_interval: Duration,
    pub act_mem_update_interval: Duration,
    last_query_consume: RwLock<Option<DateTime<Utc>>>,
    last_activation_update: RwLock<Option<DateTime<Utc>>>,
}

impl MonitorManager {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<dyn PromptStore>,
        store: Option<Arc<dyn MonitorStore>>,
        max_query_history: usize,
        query_trigger_interval: Duration,
        act_mem_update_interval: Duration,
    ) -> Self {
        Self {
            llm,
            prompts,
            store,
            state: RwLock::new(MonitorState::default()),
            max_query_history: max_query_history.max(1),
            query_trigger_interval,
            act_mem_update_interval,
            last_query_consume: RwLock::new(None),
            last_activation_update: RwLock::new(None),
        }
    }

    /// True when `interval` has elapsed since `last` (or `last` is unset).
    pub fn timed_trigger(last: Option<DateTime<Utc>>, interval: Duration) -> bool {
        match last {
            None => true,
            Some(last) => Utc::now().signed_duration_since(last) >= interval,
        }
    }

    pub async fn last_query_consume_time(&self) -> Option<DateTime<Utc>> {
        *self.last_query_consume.read().await
    }

    pub async fn mark_query_consumed(&self) {
        *self.last_query_consume.write().await = Some(Utc::now());
    }

    pub async fn last_activation_update_time(&self) -> Option<DateTime<Utc>> {
        *self.last_activation_update.read().await
    }

    pub async fn mark_activation_updated(&self) {
        *self.last_activation_update.write().await = Some(Utc::now());
    }

    /// Ensure monitors exist for `(user, cube)`, loading any persisted
    /// snapshot on first access.
    pub async fn register_if_absent(&self, user_id: &str, mem_cube_id: &str) {
        let key = (user_id.to_string(), mem_cube_id.to_string());
        {
            let state = self.state.read().await;
            if state.queries.contains_key(&key) && state.working.contains_key(&key) {
                return;
            }
        }
        let snapshot = match &self.store {
            Some(store) => match store.load(user_id, mem_cube_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(user_id, mem_cube_id, error = %e, "monitor snapshot load failed");
                    None
                }
            },
            None => None,
        };
        let mut state = self.state.write().await;
        let queries = state
            .queries
            .entry(key.clone())
            .or_insert_with(|| QueryHistory::new(self.max_query_history));
        if let Some(snapshot) = &snapshot {
            if queries.is_empty() {
                for record in snapshot.queries.clone() {
                    queries.put(record);
                }
            }
        }
        let working = state.working.entry(key).or_default();
        if let Some(snapshot) = snapshot {
            if working.is_empty() && !snapshot.working.is_empty() {
                working.replace(snapshot.working);
            }
        }
    }

    /// Append a query record to the monitor.
    pub async fn add_query(&self, user_id: &str, mem_cube_id: &str, record: QueryRecord) {
        self.register_if_absent(user_id, mem_cube_id).await;
        let key = (user_id.to_string(), mem_cube_id.to_string());
        let mut state = self.state.write().await;
        state
            .queries
            .entry(key)
            .or_insert_with(|| QueryHistory::new(self.max_query_history))
            .put(record);
    }

    /// Query texts, most recent first.
    pub async fn query_history(&self, user_id: &str, mem_cube_id: &str) -> Vec<String> {
        let key = (user_id.to_string(), mem_cube_id.to_string());
        self.state
            .read()
            .await
            .queries
            .get(&key)
            .map(QueryHistory::queries_recent_first)
            .unwrap_or_default()
    }

    /// Keyword frequency across the query history.
    pub async fn keyword_frequencies(
        &self,
        user_id: &str,
        mem_cube_id: &str,
    ) -> HashMap<String, usize> {
        let key = (user_id.to_string(), mem_cube_id.to_string());
        self.state
            .read()
            .await
            .queries
            .get(&key)
            .map(QueryHistory::keyword_frequencies)
            .unwrap_or_default()
    }

    /// Replace the working-memory monitor entries.
    pub async fn update_working_entries(
        &self,
        user_id: &str,
        mem_cube_id: &str,
        entries: Vec<WorkingMemoryEntry>,
    ) {
        let key = (user_id.to_string(), mem_cube_id.to_string());
        let mut state = self.state.write().await;
        state.working.entry(key).or_default().replace(entries);
    }

    /// Working-set items in monitor sort order.
    pub async fn working_items_sorted(&self, user_id: &str, mem_cube_id: &str) -> Vec<MemoryItem> {
        let key = (user_id.to_string(), mem_cube_id.to_string());
        self.state
            .read()
            .await
            .working
            .get(&key)
            .map(WorkingSet::sorted_items)
            .unwrap_or_default()
    }

    /// Working-set texts in monitor sort order.
    pub async fn working_texts_sorted(&self, user_id: &str, mem_cube_id: &str) -> Vec<String> {
        let key = (user_id.to_string(), mem_cube_id.to_string());
        self.state
            .read()
            .await
            .working
            .get(&key)
            .map(WorkingSet::sorted_texts)
            .unwrap_or_default()
    }

    pub async fn working_is_empty(&self, user_id: &str, mem_cube_id: &str) -> bool {
        let key = (user_id.to_string(), mem_cube_id.to_string());
        self.state
            .read()
            .await
            .working
            .get(&key)
            .is_none_or(WorkingSet::is_empty)
    }

    /// Serialize monitor state for `(user, cube)` to the store.
    pub async fn sync(&self, user_id: &str, mem_cube_id: &str) {
        let Some(store) = &self.store else {
            return;
        };
        let key = (user_id.to_string(), mem_cube_id.to_string());
        let snapshot = {
            let state = self.state.read().await;
            MonitorSnapshot {
                queries: state
                    .queries
                    .get(&key)
                    .map(|h| h.records().to_vec())
                    .unwrap_or_default(),
                working: state
                    .working
                    .get(&key)
                    .map(|w| w.entries().to_vec())
                    .unwrap_or_default(),
            }
        };
        if let Err(e) = store.save(user_id, mem_cube_id, &snapshot).await {
            warn!(user_id, mem_cube_id, error = %e, "monitor snapshot save failed");
        }
    }

    /// Extract keywords from a query via the model. Returns an empty vector
    /// on any failure; callers apply the split fallback.
    pub async fn extract_query_keywords(&self, query: &str) -> Vec<String> {
        let prompt = match self.prompts.render(
            TemplateName::KeywordExtraction,
            Locale::En,
            &[("query", query.to_string())],
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "keyword prompt render failed");
                return Vec::new();
            }
        };
        let response = match self.llm.generate(&[ChatMessage::user(prompt)]).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "keyword extraction call failed");
                return Vec::new();
            }
        };
        match extract_json_obj::<KeywordResponse>(&response) {
            Parsed::Ok(parsed) => parsed.keywords,
            Parsed::Malformed(reason) => {
                debug!(reason = %reason, "keyword response unparseable");
                Vec::new()
            }
        }
    }

    /// Decide whether the working memory covers the queries or retrieval is
    /// needed. Parse failures fail closed (no trigger); the timed trigger is
    /// the backstop.
    pub async fn detect_intent(
        &self,
        queries: &[String],
        working_texts: &[String],
    ) -> IntentResult {
        let query_lines = queries
            .iter()
            .enumerate()
            .map(|(i, q)| format!("[{i}] {q}"))
            .collect::<Vec<_>>()
            .join("\n");
        let working_lines = if working_texts.is_empty() {
            "(empty)".to_string()
        } else {
            working_texts
                .iter()
                .map(|t| format!("- {t}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = match self.prompts.render(
            TemplateName::IntentDetection,
            Locale::En,
            &[
                ("queries", query_lines),
                ("working_memory", working_lines),
            ],
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "intent prompt render failed");
                return IntentResult::default();
            }
        };
        let response = match self.llm.generate(&[ChatMessage::user(prompt)]).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "intent detection call failed");
                return IntentResult::default();
            }
        };
        match extract_json_obj::<IntentResult>(&response) {
            Parsed::Ok(result) => result,
            Parsed::Malformed(reason) => {
                warn!(reason = %reason, "intent response unparseable, not triggering");
                IntentResult::default()
            }
        }
    }
}

/// Split fallback for failed keyword extraction: whitespace words for ASCII
/// queries, characters otherwise, first occurrences kept, capped at `limit`.
pub fn fallback_keywords(query: &str, limit: usize) -> Vec<String> {
    let stripped = query.trim();
    let candidates: Vec<String> = if stripped.is_ascii() {
        stripped.split_whitespace().map(String::from).collect()
    } else {
        stripped
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(String::from)
            .collect()
    };
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .take(limit)
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
