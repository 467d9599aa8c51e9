//! Feedback handler: delegates to the external feedback processor and, in
//! cloud mode, folds the outcome into a knowledgeBaseUpdate event.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::error::DomainResult;
use crate::domain::models::{
    KbOperation, KbRecord, LogBody, ScheduleMessage, TaskLabel, WebLogEvent, WebLogLabel,
    LONG_TERM_MEMORY_TYPE, USER_INPUT_TYPE,
};
use crate::domain::ports::{FeedbackOutcome, FeedbackRequest};

use super::{HandlerContext, MessageHandler};

#[derive(Debug, Default)]
pub struct FeedbackHandler;

#[async_trait]
impl MessageHandler for FeedbackHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemFeedback
    }

    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()> {
        for msg in batch {
            if let Err(e) = self.process_single(ctx, &msg).await {
                error!(
                    user_id,
                    mem_cube_id,
                    item_id = %msg.item_id,
                    error = %e,
                    "feedback message failed"
                );
            }
        }
        Ok(())
    }
}

impl FeedbackHandler {
    async fn process_single(
        &self,
        ctx: &HandlerContext,
        msg: &ScheduleMessage,
    ) -> DomainResult<()> {
        let Some(processor) = &ctx.feedback else {
            warn!("feedback processor not configured, skipping");
            return Ok(());
        };
        let request: FeedbackRequest = match serde_json::from_str(&msg.content) {
            Ok(request) => request,
            Err(e) => {
                error!(item_id = %msg.item_id, error = %e, "invalid feedback payload");
                return Ok(());
            }
        };
        let task_id = request.task_id.clone().or_else(|| msg.task_id.clone());

        let outcome = processor
            .process(&msg.user_id, &msg.mem_cube_id, request)
            .await
            .map_err(crate::domain::error::SchedulerError::Store)?;
        info!(
            user_id = %msg.user_id,
            mem_cube_id = %msg.mem_cube_id,
            added = outcome.add.len(),
            updated = outcome.update.len(),
            "feedback processed"
        );

        if ctx.config.cloud_mode {
            self.emit_cloud(ctx, msg, task_id, &outcome).await;
        }
        Ok(())
    }

    async fn emit_cloud(
        &self,
        ctx: &HandlerContext,
        msg: &ScheduleMessage,
        task_id: Option<String>,
        outcome: &FeedbackOutcome,
    ) {
        let mut records = Vec::with_capacity(outcome.add.len() + outcome.update.len());
        for record in &outcome.add {
            if record.id.is_empty() || record.memory.is_empty() {
                warn!(record = ?record, "skipping malformed feedback add record");
                continue;
            }
            let mut kb = KbRecord::new(KbOperation::Add, record.id.clone())
                .with_trigger_source("Feedback")
                .with_content(record.memory.clone());
            if let Some(doc_id) = &record.source_doc_id {
                kb = kb.with_source_doc_id(doc_id.clone());
            }
            records.push(kb);
        }
        for record in &outcome.update {
            if record.id.is_empty() || record.memory.is_empty() {
                warn!(record = ?record, "skipping malformed feedback update record");
                continue;
            }
            let mut kb = KbRecord::new(KbOperation::Update, record.id.clone())
                .with_trigger_source("Feedback")
                .with_content(record.memory.clone());
            if let Some(original) = &record.origin_memory {
                kb = kb.with_original_content(original.clone());
            }
            if let Some(doc_id) = &record.source_doc_id {
                kb = kb.with_source_doc_id(doc_id.clone());
            }
            records.push(kb);
        }

        if records.is_empty() {
            warn!(
                user_id = %msg.user_id,
                mem_cube_id = %msg.mem_cube_id,
                "no valid feedback content for web log"
            );
            return;
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
        .with_task_id(task_id)
        .with_log_content(format!("Knowledge Base Memory Update: {change_count} changes."))
        .with_memcube_name(ctx.cube_name(&msg.mem_cube_id).await);
        ctx.web_log.submit(vec![event]).await;
    }
}
