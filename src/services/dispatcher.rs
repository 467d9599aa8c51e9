//! Dispatcher: worker pool and handler registry.
//!
//! Consumed batches are grouped by `(user, cube, label)`; each group is one
//! handler invocation, submitted to a semaphore-capped pool. Grouping
//! amortizes model calls and keeps per-user ordering natural. Handler errors
//! and TTL expiries mark the group's tasks failed; they never kill a worker.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::{ScheduleMessage, TaskLabel};

use super::handlers::{HandlerContext, MessageHandler};
use super::orchestrator::{Orchestrator, PriorityLevel};

/// A registered handler with its admission priority and optional TTL.
#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<dyn MessageHandler>,
    pub priority: PriorityLevel,
    pub ttl: Option<Duration>,
}

/// Snapshot of one in-flight handler invocation.
#[derive(Debug, Clone)]
pub struct RunningTaskInfo {
    pub item_ids: Vec<String>,
    pub user_id: String,
    pub mem_cube_id: String,
    pub label: TaskLabel,
    pub started_at: DateTime<Utc>,
}

/// Aggregate dispatcher counters.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    pub inflight: usize,
    pub handlers: usize,
}

/// Worker-pool dispatcher over the handler registry.
pub struct Dispatcher {
    handlers: RwLock<HashMap<TaskLabel, HandlerEntry>>,
    ctx: Arc<HandlerContext>,
    orchestrator: Orchestrator,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    inflight: Arc<AtomicUsize>,
    running: Arc<RwLock<HashMap<String, RunningTaskInfo>>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<HandlerContext>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            handlers: RwLock::new(HashMap::new()),
            ctx,
            orchestrator: Orchestrator::new(),
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            inflight: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Register a handler; priority defaults to the orchestrator policy.
    pub async fn register(
        &self,
        handler: Arc<dyn MessageHandler>,
        priority: Option<PriorityLevel>,
        ttl: Option<Duration>,
    ) {
        let label = handler.label();
        let priority = priority.unwrap_or_else(|| self.orchestrator.priority(label));
        self.handlers
            .write()
            .await
            .insert(label, HandlerEntry { handler, priority, ttl });
    }

    /// Remove handlers; returns which labels were actually registered.
    pub async fn unregister(&self, labels: &[TaskLabel]) -> HashMap<TaskLabel, bool> {
        let mut handlers = self.handlers.write().await;
        labels
            .iter()
            .map(|label| (*label, handlers.remove(label).is_some()))
            .collect()
    }

    pub async fn registered_labels(&self) -> Vec<TaskLabel> {
        self.handlers.read().await.keys().copied().collect()
    }

    /// Admission priority for a label: the registered entry's priority, or
    /// the orchestrator default when unregistered.
    pub async fn priority_for(&self, label: TaskLabel) -> PriorityLevel {
        match self.handlers.read().await.get(&label) {
            Some(entry) => entry.priority,
            None => self.orchestrator.priority(label),
        }
    }

    pub fn running_task_count(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub async fn running_tasks(&self) -> HashMap<String, RunningTaskInfo> {
        self.running.read().await.clone()
    }

    pub async fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            inflight: self.running_task_count(),
            handlers: self.handlers.read().await.len(),
        }
    }

    /// Group a consumed batch by (user, cube, label) and submit each group to
    /// the pool.
    pub async fn dispatch(self: &Arc<Self>, messages: Vec<ScheduleMessage>) {
        let mut groups: Vec<((String, String, TaskLabel), Vec<ScheduleMessage>)> = Vec::new();
        for msg in messages {
            let key = (msg.user_id.clone(), msg.mem_cube_id.clone(), msg.label);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(msg),
                None => groups.push((key, vec![msg])),
            }
        }
        for ((user_id, mem_cube_id, label), group) in groups {
            self.spawn_group(user_id, mem_cube_id, label, group);
        }
    }

    /// Run one group on the pool.
    fn spawn_group(
        self: &Arc<Self>,
        user_id: String,
        mem_cube_id: String,
        label: TaskLabel,
        messages: Vec<ScheduleMessage>,
    ) {
        let dispatcher = Arc::clone(self);
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                warn!(label = %label, "dispatcher pool closed, group dropped");
                return;
            };
            dispatcher
                .run_group(&user_id, &mem_cube_id, label, messages)
                .await;
        });
    }

    /// Run one group inline on the caller's task (priority-1 path).
    pub async fn execute_inline(
        &self,
        user_id: &str,
        mem_cube_id: &str,
        label: TaskLabel,
        messages: Vec<ScheduleMessage>,
    ) {
        self.run_group(user_id, mem_cube_id, label, messages).await;
    }

    async fn run_group(
        &self,
        user_id: &str,
        mem_cube_id: &str,
        label: TaskLabel,
        messages: Vec<ScheduleMessage>,
    ) {
        let entry = self.handlers.read().await.get(&label).cloned();
        let item_ids: Vec<String> = messages.iter().map(|m| m.item_id.clone()).collect();

        let Some(entry) = entry else {
            // Default handler: log and discard.
            error!(
                label = %label,
                items = item_ids.len(),
                "no handler registered, discarding group"
            );
            for item_id in &item_ids {
                self.ctx.status.task_running(item_id).await;
                self.ctx
                    .status
                    .task_failed(item_id, "no handler registered")
                    .await;
            }
            return;
        };

        let exec_id = Uuid::new_v4().to_string();
        self.inflight.fetch_add(1, Ordering::AcqRel);
        self.running.write().await.insert(
            exec_id.clone(),
            RunningTaskInfo {
                item_ids: item_ids.clone(),
                user_id: user_id.to_string(),
                mem_cube_id: mem_cube_id.to_string(),
                label,
                started_at: Utc::now(),
            },
        );
        for item_id in &item_ids {
            self.ctx.status.task_running(item_id).await;
        }

        let started = std::time::Instant::now();
        let work = entry.handler.handle(&self.ctx, messages);
        let outcome = match entry.ttl {
            Some(ttl) => match tokio::time::timeout(ttl, work).await {
                Ok(result) => result,
                Err(_) => Err(format!("timeout after {}ms", ttl.as_millis())),
            },
            None => work.await,
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.ctx.metrics.handler_duration_ms.observe(elapsed_ms);

        match outcome {
            Ok(()) => {
                debug!(label = %label, elapsed_ms, "group handled");
                for item_id in &item_ids {
                    self.ctx.status.task_succeeded(item_id).await;
                }
            }
            Err(summary) => {
                warn!(label = %label, elapsed_ms, error = %summary, "group failed");
                for item_id in &item_ids {
                    self.ctx.status.task_failed(item_id, summary.clone()).await;
                }
            }
        }

        self.running.write().await.remove(&exec_id);
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Wait for in-flight groups to drain, up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.running_task_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    inflight = self.running_task_count(),
                    "dispatcher shutdown timed out with tasks in flight"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("dispatcher drained");
    }
}
