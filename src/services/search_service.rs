//! Unified search facade over a cube's text memory.
//!
//! One search per lane (LongTermMemory, UserMemory), concatenated per query.
//! A failing lane yields empty results with a warn log instead of failing
//! the surrounding handler step. In fine mode a dedicated reranker, when
//! configured, reorders the merged results before they are returned.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::models::{MemoryItem, MemoryKind, SearchMethod};
use crate::domain::ports::{RerankClient, SearchMode, SearchRequest, TextMemory};

/// Search coordinator for handler retrieval.
#[derive(Clone, Default)]
pub struct SearchService {
    method: SearchMethod,
    reranker: Option<Arc<dyn RerankClient>>,
}

impl SearchService {
    pub fn new(method: SearchMethod) -> Self {
        Self {
            method,
            reranker: None,
        }
    }

    /// Attach a dedicated reranker, applied to fine-mode results.
    pub fn with_reranker(mut self, reranker: Arc<dyn RerankClient>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    fn mode(&self) -> SearchMode {
        match self.method {
            SearchMethod::TreeFast => SearchMode::Fast,
            SearchMethod::TreeFine => SearchMode::Fine,
        }
    }

    /// Search both long-term and user memory lanes and merge the results.
    pub async fn search(
        &self,
        text_mem: &Arc<dyn TextMemory>,
        query: &str,
        user_name: &str,
        top_k: usize,
    ) -> Vec<MemoryItem> {
        let mut merged = Vec::new();
        for kind in [MemoryKind::LongTermMemory, MemoryKind::UserMemory] {
            let request = SearchRequest::new(query, user_name, top_k)
                .with_mode(self.mode())
                .with_kind(kind);
            match text_mem.search(request).await {
                Ok(items) => {
                    debug!(
                        query,
                        lane = %kind,
                        results = items.len(),
                        "search lane completed"
                    );
                    merged.extend(items);
                }
                Err(e) => {
                    warn!(query, lane = %kind, error = %e, "search lane failed");
                }
            }
        }
        if self.method == SearchMethod::TreeFine {
            merged = self.rerank_merged(query, merged, top_k).await;
        }
        merged
    }

    /// Score the merged results with the dedicated reranker and keep the
    /// `top_k` best. Reranker failures keep the lane order.
    async fn rerank_merged(
        &self,
        query: &str,
        merged: Vec<MemoryItem>,
        top_k: usize,
    ) -> Vec<MemoryItem> {
        let Some(reranker) = &self.reranker else {
            return merged;
        };
        if merged.len() < 2 {
            return merged;
        }
        let texts: Vec<String> = merged.iter().map(|m| m.memory.clone()).collect();
        match reranker.rerank(query, &texts).await {
            Ok(scored) => {
                let mut reordered = Vec::with_capacity(top_k.min(merged.len()));
                for (idx, score) in scored.into_iter().take(top_k) {
                    if let Some(item) = merged.get(idx) {
                        debug!(idx, score, "reranked result kept");
                        reordered.push(item.clone());
                    }
                }
                if reordered.is_empty() {
                    merged
                } else {
                    reordered
                }
            }
            Err(e) => {
                warn!(query, error = %e, "reranker failed, keeping lane order");
                merged
            }
        }
    }
}
