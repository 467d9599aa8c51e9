//! Mem-read handler: fine transfer of freshly ingested raw (fast) memories.
//!
//! Fetches the raw items, runs them through the external reader, adds the
//! enriched items, optionally attaches raw-file nodes, archives merged-from
//! sources, and finally deletes the raw ids plus their working bindings.
//! Messages of a batch are processed concurrently; a failure mid-way still
//! emits a failed log event so the caller sees progress.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::domain::error::{DomainResult, StoreError};
use crate::domain::models::{
    KbOperation, KbRecord, LogBody, LogContentEntry, MemoryItem, MemoryKind, MemoryStatus,
    ScheduleMessage, TaskLabel, WebLogEvent, WebLogLabel, LONG_TERM_MEMORY_TYPE, USER_INPUT_TYPE,
};
use crate::domain::ports::MemCube;

use super::{parse_id_list, HandlerContext, MessageHandler};

#[derive(Debug, Default)]
pub struct MemReadHandler;

#[async_trait]
impl MessageHandler for MemReadHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemRead
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        let Some(cube) = ctx.mem_cube(mem_cube_id).await else {
            error!(user_id, mem_cube_id, "no mem cube registered, skipping mem_read batch");
            return Ok(());
        };
        let futures = batch
            .into_iter()
            .map(|msg| self.process_message(ctx, cube.clone(), msg));
        for result in join_all(futures).await {
            if let Err(e) = result {
                error!(error = %e, "mem_read message failed");
            }
        }
        Ok(())
    }
}

impl MemReadHandler {
    async fn process_message(
        &self,
        ctx: &HandlerContext,
        cube: std::sync::Arc<dyn MemCube>,
        msg: ScheduleMessage,
    ) -> Result<(), StoreError> {
        let mem_ids = parse_id_list(&msg.content);
        if mem_ids.is_empty() {
            return Ok(());
        }
        info!(
            user_id = %msg.user_id,
            mem_cube_id = %msg.mem_cube_id,
            mem_ids = ?mem_ids,
            "processing mem_read"
        );
        let outcome = self.run_reader(ctx, &cube, &msg, &mem_ids).await;
        if let Err(e) = &outcome {
            // Progress visibility: the caller sees the failure in the log
            // stream even though the handler returns normally.
            if ctx.config.cloud_mode {
                let records: Vec<KbRecord> = mem_ids
                    .iter()
                    .map(|id| {
                        KbRecord::new(KbOperation::Add, id.clone())
                            .with_trigger_source(HandlerContext::trigger_source(&msg))
                    })
                    .collect();
                let event = WebLogEvent::new(
                    WebLogLabel::KnowledgeBaseUpdate,
                    USER_INPUT_TYPE,
                    LONG_TERM_MEMORY_TYPE,
                    &msg.user_id,
                    &msg.mem_cube_id,
                    LogBody::Knowledge(records),
                )
                .with_task_id(msg.task_id.clone())
                .with_log_content(format!("Knowledge Base Memory Update failed: {e}"))
                .with_memcube_name(cube.name())
                .failed();
                ctx.web_log.submit(vec![event]).await;
            }
        }
        outcome
    }

    async fn run_reader(
        &self,
        ctx: &HandlerContext,
        cube: &std::sync::Arc<dyn MemCube>,
        msg: &ScheduleMessage,
        mem_ids: &[String],
    ) -> Result<(), StoreError> {
        let Some(mem_reader) = &ctx.mem_reader else {
            warn!("mem reader not configured, skipping enhanced processing");
            return Ok(());
        };
        let text_mem = cube.text_mem();
        let user_name = msg.effective_user_name();

        let mut raw_items = Vec::new();
        for mem_id in mem_ids {
            match text_mem.get(mem_id, user_name).await {
                Ok(Some(item)) => raw_items.push(item),
                Ok(None) => warn!(mem_id = %mem_id, "raw memory missing, skipping"),
                Err(e) => warn!(mem_id = %mem_id, error = %e, "raw memory fetch failed"),
            }
        }
        if raw_items.is_empty() {
            warn!("no valid raw memory items found for processing");
            return Ok(());
        }

        let bindings_to_delete: Vec<String> = raw_items
            .iter()
            .flat_map(|item| item.metadata.working_binding_ids.clone())
            .collect();

        let custom_tags = msg
            .info
            .get("custom_tags")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok());
        let processed = match mem_reader
            .fine_transfer(
                raw_items,
                custom_tags,
                user_name,
                msg.chat_history.clone(),
                msg.user_context.clone(),
            )
            .await
        {
            Ok(groups) => groups,
            Err(e) => {
                warn!(error = %e, "fine transfer failed");
                Vec::new()
            }
        };
        let flattened: Vec<MemoryItem> = processed.into_iter().flatten().collect();

        if flattened.is_empty() {
            info!("mem reader produced no enhanced memories");
        } else {
            let (raw_file_items, enriched): (Vec<MemoryItem>, Vec<MemoryItem>) = flattened
                .into_iter()
                .partition(|item| item.metadata.memory_type == MemoryKind::RawFileMemory);

            let enhanced_ids = text_mem.add(enriched.clone(), user_name).await?;
            info!(added = enhanced_ids.len(), "enhanced memories added");

            if mem_reader.save_rawfile() && !raw_file_items.is_empty() {
                let raw_count = raw_file_items.len();
                text_mem
                    .add_raw_file_nodes(raw_file_items, &enhanced_ids, &msg.user_id, user_name)
                    .await?;
                info!(count = raw_count, "raw-file memories attached");
            }

            // Archive everything the enriched items absorbed.
            if let Some(graph) = text_mem.graph_store() {
                for item in &enriched {
                    for old_id in &item.metadata.merged_from {
                        match graph
                            .update_node_status(old_id, MemoryStatus::Archived, user_name)
                            .await
                        {
                            Ok(()) => info!(old_id = %old_id, "archived merged-from memory"),
                            Err(e) => {
                                warn!(old_id = %old_id, error = %e, "failed to archive merged-from memory");
                            }
                        }
                    }
                }
            } else if enriched.iter().any(|m| !m.metadata.merged_from.is_empty()) {
                warn!("merged_from provided but graph store unavailable, skipping archive");
            }

            self.emit_added(ctx, cube, msg, &enhanced_ids, &enriched).await;
        }

        let mut delete_ids: Vec<String> = mem_ids.to_vec();
        delete_ids.extend(bindings_to_delete);
        let mut seen = std::collections::HashSet::new();
        delete_ids.retain(|id| seen.insert(id.clone()));
        if let Err(e) = text_mem.delete(&delete_ids, user_name).await {
            warn!(delete_ids = ?delete_ids, error = %e, "failed to delete raw memory ids");
        } else {
            info!(deleted = delete_ids.len(), "raw and binding ids deleted");
        }

        text_mem.remove_and_refresh(user_name).await?;
        Ok(())
    }

    async fn emit_added(
        &self,
        ctx: &HandlerContext,
        cube: &std::sync::Arc<dyn MemCube>,
        msg: &ScheduleMessage,
        enhanced_ids: &[String],
        items: &[MemoryItem],
    ) {
        if items.is_empty() {
            return;
        }
        let event = if ctx.config.cloud_mode {
            let trigger_source = HandlerContext::trigger_source(msg);
            let records: Vec<KbRecord> = items
                .iter()
                .zip(enhanced_ids.iter())
                .map(|(item, id)| {
                    let mut record = KbRecord::new(KbOperation::Add, id.clone())
                        .with_trigger_source(trigger_source.clone())
                        .with_content(item.memory.clone());
                    if let Some(doc_id) = item.metadata.file_ids.first() {
                        record = record.with_source_doc_id(doc_id.clone());
                    }
                    record
                })
                .collect();
            let change_count = records.len();
            WebLogEvent::new(
                WebLogLabel::KnowledgeBaseUpdate,
                USER_INPUT_TYPE,
                LONG_TERM_MEMORY_TYPE,
                &msg.user_id,
                &msg.mem_cube_id,
                LogBody::Knowledge(records),
            )
            .with_task_id(msg.task_id.clone())
            .with_log_content(format!(
                "Knowledge Base Memory Update: {change_count} changes."
            ))
            .with_memcube_name(cube.name())
        } else {
            let entries: Vec<LogContentEntry> = items
                .iter()
                .zip(enhanced_ids.iter())
                .map(|(item, id)| LogContentEntry {
                    content: Some(format!("{}: {}", item.key_or_derived(), item.memory)),
                    ref_id: Some(id.clone()),
                    role: None,
                    entry_type: None,
                })
                .collect();
            let metadata = items
                .iter()
                .zip(enhanced_ids.iter())
                .map(|(item, id)| {
                    serde_json::json!({
                        "ref_id": id,
                        "id": id,
                        "key": item.metadata.key,
                        "memory": item.memory,
                        "memory_type": item.metadata.memory_type.as_str(),
                        "status": item.metadata.status.as_str(),
                        "confidence": item.metadata.confidence,
                        "tags": item.metadata.tags,
                        "updated_at": item.metadata.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            WebLogEvent::new(
                WebLogLabel::AddMemory,
                USER_INPUT_TYPE,
                LONG_TERM_MEMORY_TYPE,
                &msg.user_id,
                &msg.mem_cube_id,
                LogBody::Entries(entries),
            )
            .with_task_id(msg.task_id.clone())
            .with_metadata(metadata)
            .with_memcube_name(cube.name())
        };
        ctx.web_log.submit(vec![event]).await;
    }
}
