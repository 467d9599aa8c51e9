//! Answer handler: logs the assistant turn for traceability.

use async_trait::async_trait;

use crate::domain::error::DomainResult;
use crate::domain::models::{
    LogBody, LogContentEntry, ScheduleMessage, TaskLabel, WebLogEvent, WebLogLabel,
    NOT_APPLICABLE_TYPE, USER_INPUT_TYPE,
};

use super::{HandlerContext, MessageHandler};

#[derive(Debug, Default)]
pub struct AnswerHandler;

#[async_trait]
impl MessageHandler for AnswerHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::Answer
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        _user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        let cube_name = ctx.cube_name(mem_cube_id).await;
        for msg in batch {
            let event = WebLogEvent::new(
                WebLogLabel::AddMessage,
                USER_INPUT_TYPE,
                NOT_APPLICABLE_TYPE,
                &msg.user_id,
                &msg.mem_cube_id,
                LogBody::Entries(vec![LogContentEntry {
                    content: Some(format!("[Assistant] {}", msg.content)),
                    ref_id: Some(msg.item_id.clone()),
                    role: Some("assistant".to_string()),
                    entry_type: None,
                }]),
            )
            .with_task_id(msg.task_id.clone())
            .with_memcube_name(cube_name.clone());
            ctx.web_log.submit(vec![event]).await;
        }
        Ok(())
    }
}
