//! Label handlers.
//!
//! Handlers share a lifecycle: validate the batch, group it by (user, cube),
//! run per-group work, emit web-log events, and update the status tracker.
//! Per-group failures are caught and reported; one bad group never poisons
//! the others.

pub mod add;
pub mod answer;
pub mod feedback;
pub mod mem_read;
pub mod mem_reorganize;
pub mod memory_update;
pub mod pref_add;
pub mod query;

pub use add::AddHandler;
pub use answer::AnswerHandler;
pub use feedback::FeedbackHandler;
pub use mem_read::MemReadHandler;
pub use mem_reorganize::MemReorganizeHandler;
pub use memory_update::MemoryUpdateHandler;
pub use pref_add::PrefAddHandler;
pub use query::QueryHandler;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, warn};

use crate::domain::error::DomainResult;
use crate::domain::models::{group_by_user_and_cube, ScheduleMessage, SchedulerConfig, TaskLabel};
use crate::domain::ports::{FeedbackProcessor, MemCube, MemReader};

use super::activation::ActivationManager;
use super::metrics::MetricsRegistry;
use super::monitors::MonitorManager;
use super::post_processor::PostProcessor;
use super::search_service::SearchService;
use super::status_tracker::StatusTracker;
use super::web_log::WebLogPlane;

/// Everything a handler may touch, wired explicitly at init time.
///
/// Handlers re-enter the scheduler only through the follow-up channel; there
/// are no back-references.
pub struct HandlerContext {
    pub config: Arc<SchedulerConfig>,
    pub mem_cubes: Arc<RwLock<HashMap<String, Arc<dyn MemCube>>>>,
    pub monitors: Arc<MonitorManager>,
    pub search: Arc<SearchService>,
    pub post_processor: Arc<PostProcessor>,
    pub activation: Arc<ActivationManager>,
    pub web_log: Arc<WebLogPlane>,
    pub status: Arc<StatusTracker>,
    pub metrics: Arc<MetricsRegistry>,
    pub mem_reader: Option<Arc<dyn MemReader>>,
    pub feedback: Option<Arc<dyn FeedbackProcessor>>,
    followup_tx: mpsc::UnboundedSender<Vec<ScheduleMessage>>,
}

impl HandlerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SchedulerConfig>,
        mem_cubes: Arc<RwLock<HashMap<String, Arc<dyn MemCube>>>>,
        monitors: Arc<MonitorManager>,
        search: Arc<SearchService>,
        post_processor: Arc<PostProcessor>,
        activation: Arc<ActivationManager>,
        web_log: Arc<WebLogPlane>,
        status: Arc<StatusTracker>,
        metrics: Arc<MetricsRegistry>,
        mem_reader: Option<Arc<dyn MemReader>>,
        feedback: Option<Arc<dyn FeedbackProcessor>>,
        followup_tx: mpsc::UnboundedSender<Vec<ScheduleMessage>>,
    ) -> Self {
        Self {
            config,
            mem_cubes,
            monitors,
            search,
            post_processor,
            activation,
            web_log,
            status,
            metrics,
            mem_reader,
            feedback,
            followup_tx,
        }
    }

    /// Look up the cube for an id.
    pub async fn mem_cube(&self, mem_cube_id: &str) -> Option<Arc<dyn MemCube>> {
        self.mem_cubes.read().await.get(mem_cube_id).cloned()
    }

    /// Human-facing cube name for log events, falling back to the id.
    pub async fn cube_name(&self, mem_cube_id: &str) -> String {
        self.mem_cube(mem_cube_id)
            .await
            .map_or_else(|| mem_cube_id.to_string(), |cube| cube.name())
    }

    /// Enqueue follow-up messages through the scheduler's submit path.
    pub fn submit_followups(&self, messages: Vec<ScheduleMessage>) {
        if messages.is_empty() {
            return;
        }
        if self.followup_tx.send(messages).is_err() {
            warn!("follow-up channel closed, messages dropped");
        }
    }

    /// Trigger source from a message's info map, defaulting to "Messages".
    pub fn trigger_source(message: &ScheduleMessage) -> String {
        message
            .info
            .get("trigger_source")
            .and_then(|v| v.as_str())
            .unwrap_or("Messages")
            .to_string()
    }
}

/// A handler bound to one task label.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn label(&self) -> TaskLabel;

    /// Process one (user, cube) batch.
    async fn handle_group(
        &self,
        ctx: &HandlerContext,
        user_id: &str,
        mem_cube_id: &str,
        batch: Vec<ScheduleMessage>,
    ) -> DomainResult<()>;

    /// Drive the shared lifecycle: validate, group, isolate group failures.
    /// Returns `Err` with a summary when any group failed.
    async fn handle(
        &self,
        ctx: &HandlerContext,
        messages: Vec<ScheduleMessage>,
    ) -> Result<(), String> {
        let expected = self.label();
        let accepted: Vec<ScheduleMessage> = messages
            .into_iter()
            .filter(|msg| {
                if msg.label == expected {
                    true
                } else {
                    warn!(
                        item_id = %msg.item_id,
                        got = %msg.label,
                        expected = %expected,
                        "message label mismatch, skipping"
                    );
                    false
                }
            })
            .collect();
        if accepted.is_empty() {
            return Ok(());
        }

        let mut failures: Vec<String> = Vec::new();
        for ((user_id, mem_cube_id), batch) in group_by_user_and_cube(accepted) {
            if let Err(e) = self
                .handle_group(ctx, &user_id, &mem_cube_id, batch)
                .await
            {
                error!(
                    user_id = %user_id,
                    mem_cube_id = %mem_cube_id,
                    label = %expected,
                    error = %e,
                    "group handling failed"
                );
                failures.push(format!("{user_id}/{mem_cube_id}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

/// Parse a JSON-list content payload of memory ids.
pub(crate) fn parse_id_list(content: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(content) {
        Ok(ids) => ids,
        Err(e) => {
            error!(error = %e, content = %content, "failed to parse id list content");
            Vec::new()
        }
    }
}
