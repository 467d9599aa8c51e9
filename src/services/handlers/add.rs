//! Add handler: classifies freshly ingested memory ids into add vs update
//! sets by `(key, memory_type)` lookup in the graph store, then emits the
//! corresponding log events.
//!
//! Missing ids (racing with deletes) are logged with full context and never
//! fail the batch.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::error::DomainResult;
use crate::domain::models::{
    KbOperation, KbRecord, LogBody, LogContentEntry, MemoryItem, ScheduleMessage, TaskLabel,
    WebLogEvent, WebLogLabel, LONG_TERM_MEMORY_TYPE, USER_INPUT_TYPE,
};
use crate::domain::ports::{MemCube, MetadataFilter};

use super::{parse_id_list, HandlerContext, MessageHandler};

struct UpdateCandidate {
    new_item: MemoryItem,
    original_item_id: String,
    original_content: Option<String>,
}

#[derive(Debug, Default)]
pub struct AddHandler;

#[async_trait]
impl MessageHandler for AddHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::Add
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        let Some(cube) = ctx.mem_cube(mem_cube_id).await else {
            warn!(user_id, mem_cube_id, "no mem cube registered, skipping add batch");
            return Ok(());
        };
        for msg in batch {
            let (add_items, update_items) = self.prepare(ctx, &cube, &msg).await;
            info!(
                item_id = %msg.item_id,
                add = add_items.len(),
                update = update_items.len(),
                "add message prepared"
            );
            if add_items.is_empty() && update_items.is_empty() {
                warn!(
                    user_id = %msg.user_id,
                    mem_cube_id = %msg.mem_cube_id,
                    item_id = %msg.item_id,
                    "no add/update items prepared, skipping log events"
                );
                continue;
            }
            if ctx.config.cloud_mode {
                self.emit_cloud(ctx, &msg, &add_items, &update_items).await;
            } else {
                self.emit_local(ctx, &msg, &add_items, &update_items).await;
            }
        }
        Ok(())
    }
}

impl AddHandler {
    async fn prepare(
        &self,
        ctx: &HandlerContext,
        cube: &std::sync::Arc<dyn MemCube>,
        msg: &ScheduleMessage,
    ) -> (Vec<MemoryItem>, Vec<UpdateCandidate>) {
        let ids = parse_id_list(&msg.content);
        let text_mem = cube.text_mem();
        let user_name = msg.effective_user_name();

        let mut add_items = Vec::new();
        let mut update_items = Vec::new();
        let mut missing_ids = Vec::new();

        for memory_id in ids {
            let item = match text_mem.get(&memory_id, user_name).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    missing_ids.push(memory_id);
                    continue;
                }
                Err(e) => {
                    warn!(memory_id = %memory_id, error = %e, "memory fetch failed");
                    missing_ids.push(memory_id);
                    continue;
                }
            };

            let key = item.key_or_derived();
            let mut existing_id: Option<String> = None;
            if !key.is_empty() {
                if let Some(graph) = text_mem.graph_store() {
                    let filters = [
                        MetadataFilter::eq("key", key.clone()),
                        MetadataFilter::eq("memory_type", item.metadata.memory_type.as_str()),
                    ];
                    match graph.get_by_metadata(&filters).await {
                        Ok(candidates) => existing_id = candidates.into_iter().next(),
                        Err(e) => {
                            warn!(memory_id = %item.id, error = %e, "graph lookup failed");
                        }
                    }
                }
            }

            match existing_id {
                Some(original_item_id) => {
                    let original_content = match text_mem.get(&original_item_id, user_name).await {
                        Ok(Some(original)) => Some(original.memory),
                        Ok(None) | Err(_) => None,
                    };
                    update_items.push(UpdateCandidate {
                        new_item: item,
                        original_item_id,
                        original_content,
                    });
                }
                None => add_items.push(item),
            }
        }

        if !missing_ids.is_empty() {
            warn!(
                missing_ids = ?missing_ids,
                user_id = %msg.user_id,
                mem_cube_id = %msg.mem_cube_id,
                task_id = ?msg.task_id,
                item_id = %msg.item_id,
                label = %msg.label,
                stream_key = %msg.stream_key(),
                "missing memory items during add preparation"
            );
        }
        (add_items, update_items)
    }

    fn legacy_meta(item: &MemoryItem) -> serde_json::Value {
        json!({
            "ref_id": item.id,
            "id": item.id,
            "key": item.metadata.key,
            "memory": item.memory,
            "memory_type": item.metadata.memory_type.as_str(),
            "status": item.metadata.status.as_str(),
            "confidence": item.metadata.confidence,
            "tags": item.metadata.tags,
            "updated_at": item.metadata.updated_at.to_rfc3339(),
        })
    }

    async fn emit_local(
        &self,
        ctx: &HandlerContext,
        msg: &ScheduleMessage,
        add_items: &[MemoryItem],
        update_items: &[UpdateCandidate],
    ) {
        let cube_name = ctx.cube_name(&msg.mem_cube_id).await;
        let mut events = Vec::new();

        if !add_items.is_empty() {
            let entries: Vec<LogContentEntry> = add_items
                .iter()
                .map(|item| LogContentEntry {
                    content: Some(format!("{}: {}", item.key_or_derived(), item.memory)),
                    ref_id: Some(item.id.clone()),
                    role: None,
                    entry_type: None,
                })
                .collect();
            let metadata = add_items.iter().map(Self::legacy_meta).collect();
            events.push(
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
                .with_memcube_name(cube_name.clone()),
            );
        }

        if !update_items.is_empty() {
            let entries: Vec<LogContentEntry> = update_items
                .iter()
                .map(|candidate| LogContentEntry {
                    content: Some(format!(
                        "{}: {}",
                        candidate.new_item.key_or_derived(),
                        candidate.new_item.memory
                    )),
                    ref_id: Some(candidate.original_item_id.clone()),
                    role: None,
                    entry_type: None,
                })
                .collect();
            let metadata = update_items
                .iter()
                .map(|candidate| {
                    let mut meta = Self::legacy_meta(&candidate.new_item);
                    if let Some(obj) = meta.as_object_mut() {
                        obj.insert(
                            "ref_id".to_string(),
                            json!(candidate.original_item_id.clone()),
                        );
                        obj.insert(
                            "original_content".to_string(),
                            json!(candidate.original_content.clone()),
                        );
                    }
                    meta
                })
                .collect();
            events.push(
                WebLogEvent::new(
                    WebLogLabel::UpdateMemory,
                    LONG_TERM_MEMORY_TYPE,
                    LONG_TERM_MEMORY_TYPE,
                    &msg.user_id,
                    &msg.mem_cube_id,
                    LogBody::Entries(entries),
                )
                .with_task_id(msg.task_id.clone())
                .with_metadata(metadata)
                .with_memcube_name(cube_name),
            );
        }

        ctx.web_log.submit(events).await;
    }

    async fn emit_cloud(
        &self,
        ctx: &HandlerContext,
        msg: &ScheduleMessage,
        add_items: &[MemoryItem],
        update_items: &[UpdateCandidate],
    ) {
        let trigger_source = HandlerContext::trigger_source(msg);
        let mut records = Vec::with_capacity(add_items.len() + update_items.len());
        for item in add_items {
            let mut record = KbRecord::new(KbOperation::Add, item.id.clone())
                .with_trigger_source(trigger_source.clone())
                .with_content(item.memory.clone());
            if let Some(doc_id) = item.metadata.file_ids.first() {
                record = record.with_source_doc_id(doc_id.clone());
            }
            records.push(record);
        }
        for candidate in update_items {
            let mut record = KbRecord::new(KbOperation::Update, candidate.new_item.id.clone())
                .with_trigger_source(trigger_source.clone())
                .with_content(candidate.new_item.memory.clone());
            if let Some(original) = &candidate.original_content {
                record = record.with_original_content(original.clone());
            }
            if let Some(doc_id) = candidate.new_item.metadata.file_ids.first() {
                record = record.with_source_doc_id(doc_id.clone());
            }
            records.push(record);
        }

        let change_count = records.len();
        let event = WebLogEvent::new(
            WebLogLabel::KnowledgeBaseUpdate,
            USER_INPUT_TYPE,
            LONG_TERM_MEMORY_TYPE,
            &msg.user_id,
            &msg.mem_cube_id,
            LogBody::Knowledge(records),
        )
        .with_task_id(msg.task_id.clone())
        .with_log_content(format!("Knowledge Base Memory Update: {change_count} changes."))
        .with_memcube_name(ctx.cube_name(&msg.mem_cube_id).await);
        ctx.web_log.submit(vec![event]).await;
    }
}
