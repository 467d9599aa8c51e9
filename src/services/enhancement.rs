//! Enhancement pipeline: model-driven rewrite or recreation of retrieved
//! memories against a query history.
//!
//! Large inputs are split into fixed-size batches and run concurrently; each
//! batch retries on a backoff schedule and falls back to its unchanged input
//! after the final attempt. The overall success flag is the conjunction of
//! batch successes.

use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::models::{FineStrategy, MemoryItem, MemoryKind};
use crate::domain::parse::{extract_json_obj, extract_list_items, Parsed};
use crate::domain::ports::{ChatMessage, Locale, LlmClient, PromptStore, TemplateName};

use super::post_processor::Processed;

#[derive(Debug, Deserialize)]
struct RecallResponse {
    #[serde(default)]
    hint: String,
    #[serde(default)]
    trigger_recall: bool,
}

/// Model-backed memory enhancement.
pub struct EnhancementPipeline {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<dyn PromptStore>,
    strategy: FineStrategy,
    batch_size: usize,
    retries: usize,
}

impl EnhancementPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<dyn PromptStore>,
        strategy: FineStrategy,
        batch_size: usize,
        retries: usize,
    ) -> Self {
        Self {
            llm,
            prompts,
            strategy,
            batch_size: batch_size.max(1),
            retries,
        }
    }

    /// Enhance memories against the query history.
    pub async fn enhance_memories(
        &self,
        query_history: &[String],
        memories: Vec<MemoryItem>,
    ) -> Processed<Vec<MemoryItem>> {
        if memories.is_empty() {
            return (memories, true);
        }
        if memories.len() <= self.batch_size {
            return self.process_batch(0, query_history, memories).await;
        }

        let batches: Vec<Vec<MemoryItem>> = memories
            .chunks(self.batch_size)
            .map(<[MemoryItem]>::to_vec)
            .collect();
        let batch_count = batches.len();
        let futures = batches
            .into_iter()
            .enumerate()
            .map(|(idx, batch)| self.process_batch(idx, query_history, batch));
        let results = join_all(futures).await;

        let mut enhanced = Vec::new();
        let mut all_ok = true;
        let mut failed_batches = 0;
        for (batch_memories, ok) in results {
            enhanced.extend(batch_memories);
            if !ok {
                all_ok = false;
                failed_batches += 1;
            }
        }
        info!(
            batches = batch_count,
            enhanced = enhanced.len(),
            failed_batches,
            success = all_ok,
            "multi-batch enhancement done"
        );
        (enhanced, all_ok)
    }

    async fn process_batch(
        &self,
        batch_index: usize,
        query_history: &[String],
        memories: Vec<MemoryItem>,
    ) -> Processed<Vec<MemoryItem>> {
        let prompt = match self.build_prompt(query_history, &memories) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(batch_index, error = %e, "enhancement prompt render failed");
                return (memories, false);
            }
        };

        let mut backoff = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(5))
            .build();
        let attempts = self.retries + 1;
        for attempt in 0..attempts {
            match self.try_once(&prompt, &memories).await {
                Ok(enhanced) => return (enhanced, true),
                Err(reason) => {
                    warn!(
                        batch_index,
                        attempt = attempt + 1,
                        attempts,
                        reason = %reason,
                        "enhancement attempt failed"
                    );
                    if attempt + 1 < attempts {
                        if let Some(delay) = backoff::backoff::Backoff::next_backoff(&mut backoff) {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
        (memories, false)
    }

    async fn try_once(
        &self,
        prompt: &str,
        memories: &[MemoryItem],
    ) -> Result<Vec<MemoryItem>, String> {
        let response = self
            .llm
            .generate(&[ChatMessage::user(prompt.to_string())])
            .await
            .map_err(|e| e.to_string())?;
        let lines = extract_list_items(&response);
        if lines.is_empty() {
            return Err("model returned no list items".to_string());
        }
        Ok(match self.strategy {
            FineStrategy::Recreate => {
                let user_id = memories
                    .first()
                    .and_then(|m| m.metadata.user_id.clone());
                lines
                    .into_iter()
                    .map(|text| {
                        let mut item =
                            MemoryItem::new(text).with_kind(MemoryKind::LongTermMemory);
                        item.metadata.user_id = user_id.clone();
                        item
                    })
                    .collect()
            }
            FineStrategy::Rewrite => {
                let mut enhanced = Vec::with_capacity(lines.len());
                for (pos, line) in lines.into_iter().enumerate() {
                    let (idx, text) = parse_index_and_text(&line);
                    let original = idx
                        .and_then(|i| memories.get(i))
                        .or_else(|| memories.get(pos));
                    let Some(original) = original else {
                        continue;
                    };
                    let mut item = original.clone();
                    item.memory = text;
                    enhanced.push(item);
                }
                enhanced
            }
        })
    }

    fn build_prompt(
        &self,
        query_history: &[String],
        memories: &[MemoryItem],
    ) -> Result<String, crate::domain::error::SchedulerError> {
        let history = if query_history.len() == 1 {
            query_history[0].clone()
        } else {
            query_history
                .iter()
                .enumerate()
                .map(|(i, q)| format!("[{i}] {q}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let (template, memory_lines) = match self.strategy {
            FineStrategy::Rewrite => (
                TemplateName::RewriteEnhancement,
                memories
                    .iter()
                    .enumerate()
                    .map(|(i, m)| format!("- [{i}] {}", m.memory))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            FineStrategy::Recreate => (
                TemplateName::RecreateEnhancement,
                memories
                    .iter()
                    .map(|m| format!("- {}", m.memory))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        };
        self.prompts.render(
            template,
            Locale::En,
            &[("query_history", history), ("memories", memory_lines)],
        )
    }

    /// Ask for a follow-up retrieval hint when the memories look incomplete.
    /// An empty hint means no recall, whatever the trigger flag says.
    pub async fn recall_for_missing_memories(
        &self,
        query: &str,
        memories: &[String],
    ) -> (String, bool) {
        let memories_inline = memories
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = match self.prompts.render(
            TemplateName::EnlargeRecall,
            Locale::En,
            &[
                ("query", query.to_string()),
                ("memories_inline", memories_inline),
            ],
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "recall prompt render failed");
                return (String::new(), false);
            }
        };
        let response = match self
            .llm
            .generate(&[ChatMessage::user(prompt)])
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "recall model call failed");
                return (String::new(), false);
            }
        };
        match extract_json_obj::<RecallResponse>(&response) {
            Parsed::Ok(parsed) => {
                if parsed.hint.is_empty() {
                    (parsed.hint, false)
                } else {
                    (parsed.hint, parsed.trigger_recall)
                }
            }
            Parsed::Malformed(reason) => {
                warn!(reason = %reason, "recall response unparseable");
                (String::new(), false)
            }
        }
    }
}

/// Parse `[3] text`, `3: text`, `3 - text`, `3) text` forms; returns the
/// index when present and the remaining text.
fn parse_index_and_text(line: &str) -> (Option<usize>, String) {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            if let Ok(idx) = rest[..close].parse::<usize>() {
                return (Some(idx), rest[close + 1..].trim().to_string());
            }
        }
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = trimmed[digits..].trim_start();
        for sep in [':', '-', ')'] {
            if let Some(stripped) = rest.strip_prefix(sep) {
                if let Ok(idx) = trimmed[..digits].parse::<usize>() {
                    return (Some(idx), stripped.trim().to_string());
                }
            }
        }
    }
    (None, trimmed.to_string())
}
