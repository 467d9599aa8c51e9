//! Query handler: logs the user turn and fans out a memory-update message.
//!
//! Side effect only; no mem-cube mutation happens here. The addMessage event
//! is emitted before the follow-up is enqueued, which preserves the "user
//! said X → X appears in history before derived work" contract.

use async_trait::async_trait;

use crate::domain::error::DomainResult;
use crate::domain::models::{
    LogBody, LogContentEntry, ScheduleMessage, TaskLabel, WebLogEvent, WebLogLabel,
    NOT_APPLICABLE_TYPE, USER_INPUT_TYPE,
};

use super::{HandlerContext, MessageHandler};

#[derive(Debug, Default)]
pub struct QueryHandler;

#[async_trait]
impl MessageHandler for QueryHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::Query
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        _user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        let cube_name = ctx.cube_name(mem_cube_id).await;
        let mut followups = Vec::with_capacity(batch.len());
        for msg in batch {
            let event = WebLogEvent::new(
                WebLogLabel::AddMessage,
                USER_INPUT_TYPE,
                NOT_APPLICABLE_TYPE,
                &msg.user_id,
                &msg.mem_cube_id,
                LogBody::Entries(vec![LogContentEntry {
                    content: Some(format!("[User] {}", msg.content)),
                    ref_id: Some(msg.item_id.clone()),
                    role: Some("user".to_string()),
                    entry_type: None,
                }]),
            )
            .with_task_id(msg.task_id.clone())
            .with_memcube_name(cube_name.clone());
            ctx.web_log.submit(vec![event]).await;

            let mut update = ScheduleMessage::new(
                &msg.user_id,
                &msg.mem_cube_id,
                TaskLabel::MemoryUpdate,
                &msg.content,
            );
            update.session_id = msg.session_id.clone();
            update.user_name = msg.user_name.clone();
            update.info = msg.info.clone();
            update.task_id = msg.task_id.clone();
            update.trace_id = msg.trace_id.clone();
            followups.push(update);
        }
        ctx.submit_followups(followups);
        Ok(())
    }
}
