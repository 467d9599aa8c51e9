//! Mem-reorganize handler: reports post-merge targets for reorganized
//! memories and asks the memory manager to refresh.
//!
//! The merge itself happens inside the store's reorganizer; this handler
//! resolves `MERGED_TO` edges to find the surviving node and emits one
//! mergeMemory event carrying each pre-merge item plus a synthetic
//! post-merge row.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::error::{DomainResult, StoreError};
use crate::domain::models::{
    LogBody, LogContentEntry, MemoryItem, ScheduleMessage, TaskLabel, WebLogEvent, WebLogLabel,
    LONG_TERM_MEMORY_TYPE,
};
use crate::domain::ports::{EdgeDirection, MemCube, MERGED_TO_EDGE};

use super::{parse_id_list, HandlerContext, MessageHandler};

#[derive(Debug, Default)]
pub struct MemReorganizeHandler;

#[async_trait]
impl MessageHandler for MemReorganizeHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemReorganize
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        let Some(cube) = ctx.mem_cube(mem_cube_id).await else {
            warn!(user_id, mem_cube_id, "no mem cube registered, skipping reorganize batch");
            return Ok(());
        };
        let futures = batch
            .into_iter()
            .map(|msg| self.process_message(ctx, cube.clone(), msg));
        for result in join_all(futures).await {
            if let Err(e) = result {
                error!(error = %e, "mem_reorganize message failed");
            }
        }
        Ok(())
    }
}

impl MemReorganizeHandler {
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
            "processing mem_reorganize"
        );
        let text_mem = cube.text_mem();
        let user_name = msg.effective_user_name();

        let mut items: Vec<MemoryItem> = Vec::new();
        for mem_id in &mem_ids {
            match text_mem.get(mem_id, user_name).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => warn!(mem_id = %mem_id, "reorganized memory missing"),
                Err(e) => warn!(mem_id = %mem_id, error = %e, "memory fetch failed"),
            }
        }

        if items.len() > 1 {
            self.emit_merge_event(ctx, &cube, &msg, &mem_ids, &items, user_name)
                .await;
        }

        text_mem.remove_and_refresh(user_name).await?;
        info!(user_id = %msg.user_id, "memory manager refreshed after reorganize");
        Ok(())
    }

    async fn emit_merge_event(
        &self,
        ctx: &HandlerContext,
        cube: &std::sync::Arc<dyn MemCube>,
        msg: &ScheduleMessage,
        mem_ids: &[String],
        items: &[MemoryItem],
        user_name: &str,
    ) {
        let text_mem = cube.text_mem();

        // Resolve the post-merge target through MERGED_TO edges.
        let mut merge_target: Option<String> = None;
        if let Some(graph) = text_mem.graph_store() {
            for mem_id in mem_ids {
                match graph
                    .get_edges(mem_id, MERGED_TO_EDGE, EdgeDirection::Out)
                    .await
                {
                    Ok(edges) => {
                        if let Some(edge) = edges.first() {
                            merge_target = Some(edge.to.clone());
                            break;
                        }
                    }
                    Err(e) => warn!(mem_id = %mem_id, error = %e, "edge lookup failed"),
                }
            }
        }

        let mut entries: Vec<LogContentEntry> = Vec::with_capacity(items.len() + 1);
        let mut metadata: Vec<serde_json::Value> = Vec::with_capacity(items.len() + 1);
        let mut combined_key = String::new();
        for item in items {
            let key = item.key_or_derived();
            if combined_key.is_empty() {
                combined_key = key.clone();
            }
            entries.push(LogContentEntry {
                content: Some(if key.is_empty() {
                    "(no key)".to_string()
                } else {
                    key.clone()
                }),
                ref_id: Some(item.id.clone()),
                role: None,
                entry_type: Some("merged".to_string()),
            });
            metadata.push(json!({
                "ref_id": item.id,
                "id": item.id,
                "key": key,
                "memory": item.memory,
                "memory_type": item.metadata.memory_type.as_str(),
                "status": item.metadata.status.as_str(),
                "confidence": item.metadata.confidence,
                "tags": item.metadata.tags,
                "updated_at": item.metadata.updated_at.to_rfc3339(),
            }));
        }

        // Synthetic post-merge row: the resolved target when an edge exists,
        // else a deterministic id derived from the input ids.
        let (post_ref_id, post_meta) = match &merge_target {
            Some(target) => match text_mem.get(target, user_name).await {
                Ok(Some(merged)) => {
                    if let Some(key) = &merged.metadata.key {
                        combined_key = key.clone();
                    }
                    (
                        target.clone(),
                        json!({
                            "ref_id": target,
                            "id": target,
                            "key": merged.metadata.key,
                            "memory": merged.memory,
                            "memory_type": merged.metadata.memory_type.as_str(),
                            "status": merged.metadata.status.as_str(),
                            "confidence": merged.metadata.confidence,
                            "tags": merged.metadata.tags,
                            "updated_at": merged.metadata.updated_at.to_rfc3339(),
                        }),
                    )
                }
                Ok(None) | Err(_) => (
                    target.clone(),
                    json!({"ref_id": target, "id": target, "key": combined_key}),
                ),
            },
            None => {
                let synthetic = synthetic_merge_id(mem_ids);
                (
                    synthetic.clone(),
                    json!({"ref_id": synthetic, "id": synthetic, "key": combined_key}),
                )
            }
        };
        entries.push(LogContentEntry {
            content: Some(if combined_key.is_empty() {
                "(no key)".to_string()
            } else {
                combined_key
            }),
            ref_id: Some(post_ref_id),
            role: None,
            entry_type: Some("postMerge".to_string()),
        });
        metadata.push(post_meta);

        let event = WebLogEvent::new(
            WebLogLabel::MergeMemory,
            LONG_TERM_MEMORY_TYPE,
            LONG_TERM_MEMORY_TYPE,
            &msg.user_id,
            &msg.mem_cube_id,
            LogBody::Entries(entries),
        )
        .with_task_id(msg.task_id.clone())
        .with_metadata(metadata)
        .with_memcube_name(cube.name());
        ctx.web_log.submit(vec![event]).await;
    }
}

/// Deterministic merge row id derived from the sorted input ids; stable
/// across retries of the same message.
fn synthetic_merge_id(mem_ids: &[String]) -> String {
    let mut sorted: Vec<&String> = mem_ids.iter().collect();
    sorted.sort();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for id in sorted {
        for byte in id.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^= u64::from(b'\n');
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("merge-{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_merge_id_is_order_independent() {
        let a = synthetic_merge_id(&["m1".to_string(), "m2".to_string()]);
        let b = synthetic_merge_id(&["m2".to_string(), "m1".to_string()]);
        assert_eq!(a, b);
        assert!(a.starts_with("merge-"));
    }

    #[test]
    fn test_synthetic_merge_id_differs_by_input() {
        let a = synthetic_merge_id(&["m1".to_string()]);
        let b = synthetic_merge_id(&["m2".to_string()]);
        assert_ne!(a, b);
    }
}
