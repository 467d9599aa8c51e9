//! Post-retrieval memory processing: filtering, deduplication, reranking,
//! and answerability judgment.
//!
//! Every model-backed operation fails open: a malformed response returns the
//! inputs unchanged with `ok = false` so downstream steps still make
//! progress.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::error::LlmError;
use crate::domain::models::{normalize_text_key, MemoryItem};
use crate::domain::parse::{extract_json_obj, Parsed};
use crate::domain::ports::{
    cosine_similarity, ChatMessage, EmbedClient, Locale, LlmClient, PromptStore, TemplateName,
};

/// Outcome of a fallible pipeline step: the values plus a success flag.
pub type Processed<T> = (T, bool);

/// Indices of texts to keep after greedy embedding-similarity dedup.
///
/// An item is dropped when its cosine similarity against any earlier *kept*
/// item reaches the threshold; order is preserved.
pub fn dedup_by_embedding(embeddings: &[Vec<f32>], threshold: f32) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::with_capacity(embeddings.len());
    for (idx, embedding) in embeddings.iter().enumerate() {
        let duplicate = kept.iter().any(|&kept_idx| {
            cosine_similarity(&embeddings[kept_idx], embedding)
                .is_some_and(|sim| sim >= threshold)
        });
        if !duplicate {
            kept.push(idx);
        }
    }
    kept
}

/// Drop texts shorter than `min_chars` characters.
pub fn filter_too_short(texts: Vec<String>, min_chars: usize) -> Vec<String> {
    texts
        .into_iter()
        .filter(|t| t.chars().count() >= min_chars)
        .collect()
}

/// Stable dedup by normalized text key, preserving first occurrences.
pub fn dedup_by_normalized_key(texts: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    texts
        .into_iter()
        .filter(|t| seen.insert(normalize_text_key(t)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    new_order: Vec<usize>,
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct KeepResponse {
    keep: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct AnswerAbilityResponse {
    result: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Post-processor over retrieved memory item lists.
pub struct PostProcessor {
    llm: Arc<dyn LlmClient>,
    embedder: Option<Arc<dyn EmbedClient>>,
    prompts: Arc<dyn PromptStore>,
    similarity_threshold: f32,
    min_length_threshold: usize,
}

impl PostProcessor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        embedder: Option<Arc<dyn EmbedClient>>,
        prompts: Arc<dyn PromptStore>,
        similarity_threshold: f32,
        min_length_threshold: usize,
    ) -> Self {
        Self {
            llm,
            embedder,
            prompts,
            similarity_threshold,
            min_length_threshold,
        }
    }

    async fn generate(&self, prompt: String) -> Result<String, LlmError> {
        self.llm.generate(&[ChatMessage::user(prompt)]).await
    }

    /// Rerank memory texts against the query history.
    ///
    /// The prompt uses only the most recent query; ranking against the full
    /// history is out of scope for the current template. On failure the
    /// first `top_k` inputs are returned with `ok = false`.
    pub async fn rerank_text_memories(
        &self,
        queries: &[String],
        texts: &[String],
        top_k: usize,
    ) -> Processed<Vec<String>> {
        let fallback = || texts.iter().take(top_k).cloned().collect::<Vec<_>>();
        if texts.is_empty() {
            return (Vec::new(), true);
        }
        let query = queries.first().cloned().unwrap_or_default();
        let current_order = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("[{i}] {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = match self.prompts.render(
            TemplateName::MemoryReranking,
            Locale::En,
            &[
                ("queries", format!("[0] {query}")),
                ("current_order", current_order),
            ],
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "rerank prompt render failed");
                return (fallback(), false);
            }
        };

        let response = match self.generate(prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "rerank model call failed");
                return (fallback(), false);
            }
        };

        match extract_json_obj::<RerankResponse>(&response) {
            Parsed::Ok(parsed) => {
                let mut reranked = Vec::with_capacity(top_k.min(texts.len()));
                for &idx in parsed.new_order.iter().take(top_k) {
                    let Some(text) = texts.get(idx) else {
                        warn!(idx, "rerank returned out-of-range index, falling back");
                        return (fallback(), false);
                    };
                    reranked.push(text.clone());
                }
                info!(
                    kept = reranked.len(),
                    reasoning = %parsed.reasoning,
                    "memory rerank complete"
                );
                (reranked, true)
            }
            Parsed::Malformed(reason) => {
                warn!(reason = %reason, "rerank response unparseable, keeping input order");
                (fallback(), false)
            }
        }
    }

    /// Merge, dedup, length-filter, and rerank memory items.
    ///
    /// Pipeline: merge original+new → embedding-cosine dedup → length filter
    /// → stable normalized-key dedup → model rerank → map texts back to the
    /// original items.
    pub async fn process_and_rerank(
        &self,
        queries: &[String],
        original: Vec<MemoryItem>,
        new: Vec<MemoryItem>,
        top_k: usize,
    ) -> Processed<Vec<MemoryItem>> {
        let combined: Vec<MemoryItem> = original.into_iter().chain(new).collect();
        let mut memory_map: HashMap<String, MemoryItem> = HashMap::new();
        for item in &combined {
            memory_map.insert(normalize_text_key(&item.memory), item.clone());
        }
        let mut texts: Vec<String> = combined.iter().map(|m| m.memory.clone()).collect();

        texts = self.dedup_similar_texts(texts).await;
        texts = filter_too_short(texts, self.min_length_threshold);
        texts = dedup_by_normalized_key(texts);

        let (reranked_texts, ok) = self.rerank_text_memories(queries, &texts, top_k).await;

        let mut reranked_items = Vec::with_capacity(reranked_texts.len());
        for text in reranked_texts {
            let key = normalize_text_key(&text);
            match memory_map.get(&key) {
                Some(item) => reranked_items.push(item.clone()),
                None => warn!(text = %text, "reranked text missing from memory map"),
            }
        }
        (reranked_items, ok)
    }

    async fn dedup_similar_texts(&self, texts: Vec<String>) -> Vec<String> {
        let Some(embedder) = &self.embedder else {
            return texts;
        };
        if texts.len() < 2 {
            return texts;
        }
        match embedder.embed(&texts).await {
            Ok(embeddings) if embeddings.len() == texts.len() => {
                let kept = dedup_by_embedding(&embeddings, self.similarity_threshold);
                debug!(before = texts.len(), after = kept.len(), "similarity dedup");
                kept.into_iter().map(|i| texts[i].clone()).collect()
            }
            Ok(_) => {
                warn!("embedder returned mismatched vector count, skipping dedup");
                texts
            }
            Err(e) => {
                warn!(error = %e, "embedding failed, skipping similarity dedup");
                texts
            }
        }
    }

    /// Filter out memories unrelated to the query history. Fails open.
    pub async fn filter_unrelated(
        &self,
        query_history: &[String],
        items: Vec<MemoryItem>,
    ) -> Processed<Vec<MemoryItem>> {
        self.filter_with_template(TemplateName::UnrelatedFilter, query_history, items)
            .await
    }

    /// Filter out redundant memories. Fails open.
    pub async fn filter_redundant(
        &self,
        query_history: &[String],
        items: Vec<MemoryItem>,
    ) -> Processed<Vec<MemoryItem>> {
        self.filter_with_template(TemplateName::RedundantFilter, query_history, items)
            .await
    }

    async fn filter_with_template(
        &self,
        template: TemplateName,
        query_history: &[String],
        items: Vec<MemoryItem>,
    ) -> Processed<Vec<MemoryItem>> {
        if items.is_empty() {
            return (items, true);
        }
        let queries = query_history
            .iter()
            .enumerate()
            .map(|(i, q)| format!("[{i}] {q}"))
            .collect::<Vec<_>>()
            .join("\n");
        let memories = items
            .iter()
            .enumerate()
            .map(|(i, m)| format!("[{i}] {}", m.memory))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = match self.prompts.render(
            template,
            Locale::En,
            &[("queries", queries), ("memories", memories)],
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "filter prompt render failed");
                return (items, false);
            }
        };
        let response = match self.generate(prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "filter model call failed");
                return (items, false);
            }
        };
        match extract_json_obj::<KeepResponse>(&response) {
            Parsed::Ok(parsed) if parsed.keep.len() == items.len() => {
                let filtered: Vec<MemoryItem> = items
                    .iter()
                    .zip(parsed.keep.iter())
                    .filter(|(_, &keep)| keep)
                    .map(|(item, _)| item.clone())
                    .collect();
                (filtered, true)
            }
            Parsed::Ok(parsed) => {
                warn!(
                    expected = items.len(),
                    got = parsed.keep.len(),
                    "filter keep-vector length mismatch, keeping all"
                );
                (items, false)
            }
            Parsed::Malformed(reason) => {
                warn!(reason = %reason, "filter response unparseable, keeping all");
                (items, false)
            }
        }
    }

    /// Judge whether the given memories suffice to answer the query.
    /// Parse failures return `false`.
    pub async fn evaluate_answer_ability(
        &self,
        query: &str,
        memory_texts: &[String],
        top_k: Option<usize>,
    ) -> bool {
        let limited: Vec<&String> = match top_k {
            Some(k) => memory_texts.iter().take(k).collect(),
            None => memory_texts.iter().collect(),
        };
        let memory_list = if limited.is_empty() {
            "No memories available".to_string()
        } else {
            limited
                .iter()
                .map(|m| format!("- {m}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = match self.prompts.render(
            TemplateName::AnswerAbility,
            Locale::En,
            &[("query", query.to_string()), ("memory_list", memory_list)],
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "answerability prompt render failed");
                return false;
            }
        };
        let response = match self.generate(prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "answerability model call failed");
                return false;
            }
        };
        match extract_json_obj::<AnswerAbilityResponse>(&response) {
            Parsed::Ok(parsed) => {
                info!(
                    result = parsed.result,
                    reason = parsed.reason.as_deref().unwrap_or("n/a"),
                    evaluated = limited.len(),
                    "answerability judged"
                );
                parsed.result
            }
            Parsed::Malformed(reason) => {
                warn!(reason = %reason, "answerability response unparseable");
                false
            }
        }
    }
}
