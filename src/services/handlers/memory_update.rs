//! Memory-update handler: the working-memory reconciliation loop.
//!
//! Registers queries with the monitors, decides (intent model or timed
//! trigger) whether retrieval is needed, searches per missing evidence, and
//! replaces the cube's working set with the reranked, filtered result.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::error::DomainResult;
use crate::domain::models::{
    LogBody, LogContentEntry, MemoryItem, QueryRecord, ScheduleMessage, TaskLabel, WebLogEvent,
    WebLogLabel, WorkingMemoryEntry, FAST_MODE_TAG, LONG_TERM_MEMORY_TYPE, WORKING_MEMORY_TYPE,
};
use crate::domain::ports::MemCube;
use crate::services::monitors::{fallback_keywords, MonitorManager};

use super::{HandlerContext, MessageHandler};

/// Outcome of one session turn: the current working set and the retrieved
/// candidates (empty when no trigger fired).
pub struct SessionTurn {
    pub working: Vec<MemoryItem>,
    pub candidates: Vec<MemoryItem>,
}

#[derive(Debug, Default)]
pub struct MemoryUpdateHandler;

#[async_trait]
impl MessageHandler for MemoryUpdateHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemoryUpdate
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        let Some(cube) = ctx.mem_cube(mem_cube_id).await else {
            warn!(user_id, mem_cube_id, "no mem cube registered, skipping update batch");
            return Ok(());
        };

        for msg in &batch {
            ctx.monitors.register_if_absent(user_id, mem_cube_id).await;
            let query = msg.content.clone();
            let mut keywords = ctx.monitors.extract_query_keywords(&query).await;
            if keywords.is_empty() {
                keywords = fallback_keywords(&query, ctx.config.query_key_words_limit);
                warn!(
                    user_id,
                    query = %query,
                    fallback = ?keywords.iter().take(10).collect::<Vec<_>>(),
                    "keyword extraction empty, using split fallback"
                );
            }
            ctx.monitors
                .add_query(user_id, mem_cube_id, QueryRecord::new(query, keywords))
                .await;
        }
        ctx.monitors.sync(user_id, mem_cube_id).await;

        let queries: Vec<String> = batch.iter().map(|m| m.content.clone()).collect();
        let turn = self
            .process_session_turn(ctx, &queries, user_id, mem_cube_id, &cube)
            .await;
        info!(
            user_id,
            queries = queries.len(),
            candidates = turn.candidates.len(),
            "session turn processed"
        );

        let new_working = self
            .replace_working_memory(ctx, user_id, mem_cube_id, &cube, turn.working, turn.candidates)
            .await?;
        debug!(
            user_id,
            working = new_working.len(),
            "working memory reconciled"
        );

        if ctx.config.enable_activation_memory {
            ctx.activation
                .refresh_periodically(user_id, mem_cube_id, &cube)
                .await;
        }
        Ok(())
    }
}

impl MemoryUpdateHandler {
    /// Read the working set, detect intent, and retrieve candidates for the
    /// missing evidences. The no-trigger path returns the current working
    /// set with no candidates.
    pub async fn process_session_turn(
        &self,
        ctx: &HandlerContext,
        queries: &[String],
        user_id: &str,
        mem_cube_id: &str,
        cube: &Arc<dyn MemCube>,
    ) -> SessionTurn {
        let top_k = ctx.config.top_k;
        let text_mem = cube.text_mem();
        let mut working = match text_mem.get_working_memory(mem_cube_id).await {
            Ok(working) => working,
            Err(e) => {
                warn!(user_id, mem_cube_id, error = %e, "working memory read failed");
                Vec::new()
            }
        };
        working.truncate(top_k);

        let working_texts: Vec<String> = working.iter().map(|m| m.memory.clone()).collect();
        let mut intent = ctx.monitors.detect_intent(queries, &working_texts).await;
        let time_trigger = MonitorManager::timed_trigger(
            ctx.monitors.last_query_consume_time().await,
            ctx.monitors.query_trigger_interval,
        );

        if !intent.trigger_retrieval && !time_trigger {
            info!(user_id, mem_cube_id, "retrieval not triggered this turn");
            return SessionTurn {
                working,
                candidates: Vec::new(),
            };
        }
        if !intent.trigger_retrieval && time_trigger {
            info!(user_id, mem_cube_id, "retrieval forced by timed trigger");
            intent.trigger_retrieval = true;
            intent.missing_evidences = queries.to_vec();
        }

        let evidences = intent.missing_evidences;
        let k_per_evidence = std::cmp::max(1, top_k / std::cmp::max(1, evidences.len()));
        let mut candidates = Vec::new();
        for evidence in &evidences {
            debug!(
                user_id,
                evidence = %evidence,
                k = k_per_evidence,
                "searching for missing evidence"
            );
            let results = ctx
                .search
                .search(&text_mem, evidence, mem_cube_id, k_per_evidence)
                .await;
            candidates.extend(results);
        }
        ctx.monitors.mark_query_consumed().await;
        SessionTurn {
            working,
            candidates,
        }
    }

    /// Rerank and filter the merged set, update the monitors, and replace the
    /// cube's working memory in sorted order.
    pub async fn replace_working_memory(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        cube: &Arc<dyn MemCube>,
        original: Vec<MemoryItem>,
        new: Vec<MemoryItem>,
    ) -> DomainResult<Vec<MemoryItem>> {
        let query_history = ctx.monitors.query_history(user_id, mem_cube_id).await;

        let original_count = original.len();
        let filtered_original: Vec<MemoryItem> = original
            .into_iter()
            .filter(|item| !item.has_tag(FAST_MODE_TAG))
            .collect();
        info!(
            removed = original_count - filtered_original.len(),
            remaining = filtered_original.len(),
            "fast-mode items filtered from working set"
        );

        let (mut reordered, rerank_ok) = ctx
            .post_processor
            .process_and_rerank(
                &query_history,
                filtered_original.clone(),
                new,
                ctx.config.top_k,
            )
            .await;

        let (filtered, filter_ok) = ctx
            .post_processor
            .filter_unrelated(&query_history, reordered.clone())
            .await;
        if filter_ok {
            info!(
                before = reordered.len(),
                after = filtered.len(),
                "unrelated-memory filter applied"
            );
            reordered = filtered;
        } else {
            warn!(
                count = reordered.len(),
                "unrelated-memory filter failed, keeping all memories"
            );
        }

        let keyword_freq = ctx.monitors.keyword_frequencies(user_id, mem_cube_id).await;
        let total = reordered.len();
        let mut entries: Vec<WorkingMemoryEntry> = reordered
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                WorkingMemoryEntry::from_item(item.clone(), idx, total, &keyword_freq)
            })
            .collect();
        if !rerank_ok {
            for entry in &mut entries {
                entry.sorting_score = 0.0;
            }
        }
        ctx.monitors
            .update_working_entries(user_id, mem_cube_id, entries)
            .await;

        let new_working = ctx.monitors.working_items_sorted(user_id, mem_cube_id).await;
        cube.text_mem()
            .replace_working_memory(new_working.clone())
            .await
            .map_err(crate::domain::error::SchedulerError::Store)?;
        ctx.monitors.sync(user_id, mem_cube_id).await;

        let entries: Vec<LogContentEntry> = new_working
            .iter()
            .map(|item| LogContentEntry {
                content: Some(item.memory.clone()),
                ref_id: Some(item.id.clone()),
                role: None,
                entry_type: None,
            })
            .collect();
        let event = WebLogEvent::new(
            WebLogLabel::UpdateMemory,
            LONG_TERM_MEMORY_TYPE,
            WORKING_MEMORY_TYPE,
            user_id,
            mem_cube_id,
            LogBody::Entries(entries),
        )
        .with_log_content(format!(
            "Working memory replaced: old={}, new={}",
            filtered_original.len(),
            new_working.len()
        ))
        .with_memcube_name(cube.name());
        ctx.web_log.submit(vec![event]).await;

        info!(
            user_id,
            mem_cube_id,
            old = filtered_original.len(),
            new = new_working.len(),
            "working memory replaced"
        );
        Ok(new_working)
    }
}
