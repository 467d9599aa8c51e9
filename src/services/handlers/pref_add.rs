//! Pref-add handler: extracts preference memories from a chat transcript and
//! adds them to the cube's preference memory. Idempotent on `item_id`.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::domain::error::{DomainResult, StoreError};
use crate::domain::models::{ChatTurn, ScheduleMessage, TaskLabel};
use crate::domain::ports::MemCube;

use super::{HandlerContext, MessageHandler};

#[derive(Debug, Default)]
pub struct PrefAddHandler;

#[async_trait]
impl MessageHandler for PrefAddHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::PrefAdd
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        let Some(cube) = ctx.mem_cube(mem_cube_id).await else {
            warn!(user_id, mem_cube_id, "no mem cube registered, skipping pref_add batch");
            return Ok(());
        };
        let futures = batch
            .into_iter()
            .map(|msg| self.process_message(cube.clone(), msg));
        for result in join_all(futures).await {
            if let Err(e) = result {
                error!(error = %e, "pref_add message failed");
            }
        }
        Ok(())
    }
}

impl PrefAddHandler {
    async fn process_message(
        &self,
        cube: std::sync::Arc<dyn MemCube>,
        msg: ScheduleMessage,
    ) -> Result<(), StoreError> {
        let Some(pref_mem) = cube.pref_mem() else {
            warn!(
                mem_cube_id = %msg.mem_cube_id,
                "preference memory not initialized, skipping pref_add"
            );
            return Ok(());
        };
        let messages: Vec<ChatTurn> = match serde_json::from_str(&msg.content) {
            Ok(messages) => messages,
            Err(e) => {
                error!(item_id = %msg.item_id, error = %e, "invalid pref_add payload");
                return Ok(());
            }
        };

        let mut info: HashMap<String, serde_json::Value> = msg.info.clone();
        info.insert("user_id".to_string(), serde_json::json!(msg.user_id));
        info.insert("mem_cube_id".to_string(), serde_json::json!(msg.mem_cube_id));
        if let Some(session_id) = &msg.session_id {
            info.insert("session_id".to_string(), serde_json::json!(session_id));
        }
        // Idempotency key: re-delivered messages extract into the same slot.
        info.insert("item_id".to_string(), serde_json::json!(msg.item_id));

        let preferences = pref_mem
            .extract(messages, info, msg.user_context.clone())
            .await?;
        let pref_ids = pref_mem.add(preferences).await?;
        info!(
            user_id = %msg.user_id,
            mem_cube_id = %msg.mem_cube_id,
            pref_ids = ?pref_ids,
            "preferences extracted and added"
        );
        Ok(())
    }
}
