//! Activation memory manager.
//!
//! Periodically assembles the current working set into a composed prompt and
//! refreshes the cube's activation cache with it. Refreshes are guarded by an
//! interval and are idempotent on the composed text: an unchanged
//! composition skips the cache rewrite entirely. Errors are logged and the
//! next interval retries; nothing propagates to callers.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::models::{
    LogBody, LogContentEntry, WebLogEvent, WebLogLabel, ACTIVATION_MEMORY_TYPE,
    WORKING_MEMORY_TYPE,
};
use crate::domain::ports::{Locale, MemCube, PromptStore, TemplateName};

use super::monitors::MonitorManager;
use super::web_log::WebLogPlane;

/// Interval-guarded activation cache maintenance.
pub struct ActivationManager {
    dump_path: PathBuf,
    monitors: Arc<MonitorManager>,
    prompts: Arc<dyn PromptStore>,
    web_log: Arc<WebLogPlane>,
}

impl ActivationManager {
    pub fn new(
        dump_path: PathBuf,
        monitors: Arc<MonitorManager>,
        prompts: Arc<dyn PromptStore>,
        web_log: Arc<WebLogPlane>,
    ) -> Self {
        Self {
            dump_path,
            monitors,
            prompts,
            web_log,
        }
    }

    /// Compose the numbered-list assembly prompt from working texts; empty
    /// strings are skipped.
    pub fn compose(&self, texts: &[String]) -> String {
        let numbered: String = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .enumerate()
            .map(|(i, t)| format!("{}. {}\n", i + 1, t.trim()))
            .collect();
        self.prompts
            .render(
                TemplateName::MemoryAssembly,
                Locale::En,
                &[("memory_text", numbered.clone())],
            )
            .unwrap_or(numbered)
    }

    /// Refresh the activation cache when the update interval has elapsed.
    pub async fn refresh_periodically(
        &self,
        user_id: &str,
        mem_cube_id: &str,
        mem_cube: &Arc<dyn MemCube>,
    ) {
        let last = self.monitors.last_activation_update_time().await;
        if !MonitorManager::timed_trigger(last, self.monitors.act_mem_update_interval) {
            info!(
                user_id,
                mem_cube_id,
                "activation refresh skipped, interval not reached"
            );
            return;
        }
        if self.monitors.working_is_empty(user_id, mem_cube_id).await {
            warn!(
                user_id,
                mem_cube_id,
                "working memory monitor empty, activation refresh skipped"
            );
            return;
        }
        let texts = self.monitors.working_texts_sorted(user_id, mem_cube_id).await;
        self.refresh(&texts, user_id, mem_cube_id, mem_cube).await;
        self.monitors.mark_activation_updated().await;
    }

    /// Refresh the activation cache from the given working texts.
    pub async fn refresh(
        &self,
        new_texts: &[String],
        user_id: &str,
        mem_cube_id: &str,
        mem_cube: &Arc<dyn MemCube>,
    ) {
        if new_texts.is_empty() {
            error!(user_id, mem_cube_id, "activation refresh with no memories");
            return;
        }
        let Some(act_mem) = mem_cube.act_mem() else {
            warn!(mem_cube_id, "mem cube has no activation cache");
            return;
        };
        let composed = self.compose(new_texts);

        let original_texts = match act_mem.get_all().await {
            Ok(existing) => {
                if let Some(last) = existing.last() {
                    if last.composed_text == composed {
                        warn!(
                            user_id,
                            mem_cube_id,
                            "composition unchanged, skipping activation update"
                        );
                        return;
                    }
                }
                let originals = existing
                    .last()
                    .map(|item| item.text_memories.clone())
                    .unwrap_or_default();
                if !existing.is_empty() {
                    if let Err(e) = act_mem.delete_all().await {
                        error!(user_id, mem_cube_id, error = %e, "activation cache clear failed");
                        return;
                    }
                }
                originals
            }
            Err(e) => {
                error!(user_id, mem_cube_id, error = %e, "activation cache read failed");
                return;
            }
        };

        let mut cache_item = match act_mem.extract(&composed).await {
            Ok(item) => item,
            Err(e) => {
                error!(user_id, mem_cube_id, error = %e, "activation extraction failed");
                return;
            }
        };
        cache_item.text_memories = new_texts.to_vec();
        cache_item.timestamp = Utc::now();

        if let Err(e) = act_mem.add(vec![cache_item]).await {
            error!(user_id, mem_cube_id, error = %e, "activation cache add failed");
            return;
        }
        if let Err(e) = act_mem.dump(&self.dump_path).await {
            error!(
                user_id,
                mem_cube_id,
                path = %self.dump_path.display(),
                error = %e,
                "activation cache dump failed"
            );
        }

        let entries: Vec<LogContentEntry> = new_texts
            .iter()
            .map(|t| LogContentEntry {
                content: Some(t.clone()),
                ..Default::default()
            })
            .collect();
        let event = WebLogEvent::new(
            WebLogLabel::UpdateMemory,
            WORKING_MEMORY_TYPE,
            ACTIVATION_MEMORY_TYPE,
            user_id,
            mem_cube_id,
            LogBody::Entries(entries),
        )
        .with_memcube_name(mem_cube.name())
        .with_log_content(format!(
            "Activation memory refreshed: {} -> {} texts",
            original_texts.len(),
            new_texts.len()
        ));
        self.web_log.submit(vec![event]).await;
        info!(
            user_id,
            mem_cube_id,
            texts = new_texts.len(),
            "activation memory updated"
        );
    }
}
