//! Scheduler shell: lifecycle, module wiring, the submit path, and the
//! consumer / metrics loops.
//!
//! `submit_messages` is best-effort: it never raises for downstream failure,
//! only for local invariant violations (submitting before `init_modules`).
//! Priority-1 labels execute inline on the submitting path; everything else
//! is queued and drained by the consumer loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::error::{DomainResult, SchedulerError};
use crate::domain::models::{
    ConsumerMode, ScheduleMessage, SchedulerConfig, TaskLabel, TaskStatusRecord, WebLogEvent,
};
use crate::domain::ports::{
    BuiltinPromptStore, EmbedClient, FeedbackProcessor, LlmClient, LogBroker, MemCube, MemReader,
    MonitorStore, PromptStore, RerankClient, SharedLogClient,
};

use super::activation::ActivationManager;
use super::dispatcher::{Dispatcher, RunningTaskInfo};
use super::enhancement::EnhancementPipeline;
use super::handlers::{
    AddHandler, AnswerHandler, FeedbackHandler, HandlerContext, MemReadHandler,
    MemReorganizeHandler, MemoryUpdateHandler, MessageHandler, PrefAddHandler, QueryHandler,
};
use super::metrics::MetricsRegistry;
use super::monitors::MonitorManager;
use super::orchestrator::PriorityLevel;
use super::post_processor::PostProcessor;
use super::search_service::SearchService;
use super::status_tracker::StatusTracker;
use super::task_queue::{QueueSizes, TaskQueue};
use super::web_log::WebLogPlane;

/// External collaborators handed to [`MemScheduler::init_modules`].
#[derive(Default)]
pub struct Modules {
    pub chat_llm: Option<Arc<dyn LlmClient>>,
    /// Pipeline model; falls back to `chat_llm` when unset.
    pub process_llm: Option<Arc<dyn LlmClient>>,
    pub embedder: Option<Arc<dyn EmbedClient>>,
    /// Dedicated reranker for fine-mode search results.
    pub reranker: Option<Arc<dyn RerankClient>>,
    pub monitor_store: Option<Arc<dyn MonitorStore>>,
    pub mem_reader: Option<Arc<dyn MemReader>>,
    pub feedback: Option<Arc<dyn FeedbackProcessor>>,
    pub shared_log: Option<Arc<dyn SharedLogClient>>,
    pub broker: Option<Arc<dyn LogBroker>>,
    pub prompts: Option<Arc<dyn PromptStore>>,
}

/// TTL applied to the pref_add handler by default.
const PREF_ADD_TTL: Duration = Duration::from_secs(600);
/// Queue-depth sampling interval for the metrics monitor loop.
const MONITOR_INTERVAL: Duration = Duration::from_secs(15);
/// How long shutdown waits for in-flight groups.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

struct Runtime {
    queue: Arc<TaskQueue>,
    dispatcher: Arc<Dispatcher>,
    web_log: Arc<WebLogPlane>,
    enhancement: Arc<EnhancementPipeline>,
}

enum ConsumerHandle {
    Task(tokio::task::JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
}

#[derive(Default)]
struct LoopHandles {
    consumer: Option<ConsumerHandle>,
    monitor: Option<tokio::task::JoinHandle<()>>,
}

struct SchedulerCore {
    config: Arc<SchedulerConfig>,
    status: Arc<StatusTracker>,
    metrics: Arc<MetricsRegistry>,
    mem_cubes: Arc<RwLock<HashMap<String, Arc<dyn MemCube>>>>,
    runtime: RwLock<Option<Arc<Runtime>>>,
    running: AtomicBool,
    handles: Mutex<LoopHandles>,
    followup_tx: mpsc::UnboundedSender<Vec<ScheduleMessage>>,
    followup_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<ScheduleMessage>>>>,
}

/// The memory scheduler.
///
/// Cheap to clone; all clones share one core.
#[derive(Clone)]
pub struct MemScheduler {
    core: Arc<SchedulerCore>,
}

impl MemScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (followup_tx, followup_rx) = mpsc::unbounded_channel();
        Self {
            core: Arc::new(SchedulerCore {
                config: Arc::new(config),
                status: Arc::new(StatusTracker::new()),
                metrics: Arc::new(MetricsRegistry::new()),
                mem_cubes: Arc::new(RwLock::new(HashMap::new())),
                runtime: RwLock::new(None),
                running: AtomicBool::new(false),
                handles: Mutex::new(LoopHandles::default()),
                followup_tx,
                followup_rx: Mutex::new(Some(followup_rx)),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    pub fn status_tracker(&self) -> Arc<StatusTracker> {
        self.core.status.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.core.metrics.clone()
    }

    /// Register a mem cube under its id.
    pub async fn set_mem_cube(&self, mem_cube_id: impl Into<String>, cube: Arc<dyn MemCube>) {
        self.core
            .mem_cubes
            .write()
            .await
            .insert(mem_cube_id.into(), cube);
    }

    /// Register several mem cubes at once.
    pub async fn set_mem_cubes(&self, cubes: HashMap<String, Arc<dyn MemCube>>) {
        self.core.mem_cubes.write().await.extend(cubes);
    }

    /// Wire the external collaborators and build the runtime: monitors,
    /// pipelines, queue, dispatcher, and the default handler registry.
    ///
    /// Fatal on missing required modules; partially initialized resources
    /// are released before the error is returned.
    #[instrument(skip_all, err)]
    pub async fn init_modules(&self, modules: Modules) -> DomainResult<()> {
        let config = &self.core.config;
        let Some(chat_llm) = modules.chat_llm else {
            return Err(SchedulerError::Config("chat_llm is required".to_string()));
        };
        let process_llm = modules.process_llm.unwrap_or_else(|| chat_llm.clone());
        let prompts: Arc<dyn PromptStore> = modules
            .prompts
            .unwrap_or_else(|| Arc::new(BuiltinPromptStore::new()));

        if config.use_shared_log && modules.shared_log.is_none() {
            return Err(SchedulerError::Config(
                "use_shared_log set but no shared log client provided".to_string(),
            ));
        }

        let web_log = match modules.broker {
            Some(broker) => Arc::new(WebLogPlane::with_broker(
                config.max_web_log_queue_size,
                broker,
            )),
            None => Arc::new(WebLogPlane::new(config.max_web_log_queue_size)),
        };

        let monitors = Arc::new(MonitorManager::new(
            process_llm.clone(),
            prompts.clone(),
            modules.monitor_store,
            config.max_query_history,
            config.query_trigger_interval(),
            config.act_mem_update_interval(),
        ));
        let post_processor = Arc::new(PostProcessor::new(
            process_llm.clone(),
            modules.embedder,
            prompts.clone(),
            config.filter_similarity_threshold,
            config.filter_min_length_threshold,
        ));
        let enhancement = Arc::new(EnhancementPipeline::new(
            process_llm,
            prompts.clone(),
            config.fine_strategy,
            config.batch_size,
            config.retries,
        ));
        let search = match modules.reranker {
            Some(reranker) => {
                Arc::new(SearchService::new(config.search_method).with_reranker(reranker))
            }
            None => Arc::new(SearchService::new(config.search_method)),
        };
        let activation = Arc::new(ActivationManager::new(
            config.act_mem_dump_path.clone(),
            monitors.clone(),
            prompts,
            web_log.clone(),
        ));

        let queue = match modules.shared_log.filter(|_| config.use_shared_log) {
            Some(client) => Arc::new(TaskQueue::shared(
                client,
                config.max_internal_queue_size,
                config.overflow_policy,
                self.core.status.clone(),
                self.core.metrics.clone(),
            )),
            None => Arc::new(TaskQueue::in_memory(
                config.max_internal_queue_size,
                config.overflow_policy,
                self.core.status.clone(),
                self.core.metrics.clone(),
            )),
        };

        let ctx = Arc::new(HandlerContext::new(
            config.clone(),
            self.core.mem_cubes.clone(),
            monitors,
            search,
            post_processor,
            activation,
            web_log.clone(),
            self.core.status.clone(),
            self.core.metrics.clone(),
            modules.mem_reader,
            modules.feedback,
            self.core.followup_tx.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(ctx, config.thread_pool_max_workers));
        Self::register_default_handlers(&dispatcher).await;

        *self.core.runtime.write().await = Some(Arc::new(Runtime {
            queue,
            dispatcher,
            web_log,
            enhancement,
        }));

        self.spawn_followup_pump().await;
        info!("scheduler modules initialized");
        Ok(())
    }

    async fn register_default_handlers(dispatcher: &Arc<Dispatcher>) {
        dispatcher
            .register(Arc::new(QueryHandler), Some(PriorityLevel::Level1), None)
            .await;
        dispatcher
            .register(Arc::new(AnswerHandler), Some(PriorityLevel::Level1), None)
            .await;
        dispatcher
            .register(Arc::new(AddHandler), Some(PriorityLevel::Level1), None)
            .await;
        dispatcher
            .register(Arc::new(MemoryUpdateHandler), None, None)
            .await;
        dispatcher.register(Arc::new(MemReadHandler), None, None).await;
        dispatcher
            .register(Arc::new(MemReorganizeHandler), None, None)
            .await;
        dispatcher.register(Arc::new(FeedbackHandler), None, None).await;
        dispatcher
            .register(Arc::new(PrefAddHandler), None, Some(PREF_ADD_TTL))
            .await;
    }

    /// Register or replace a handler.
    pub async fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        priority: Option<PriorityLevel>,
        ttl: Option<Duration>,
    ) -> DomainResult<()> {
        let runtime = self.runtime().await?;
        runtime.dispatcher.register(handler, priority, ttl).await;
        Ok(())
    }

    /// Unregister handlers by label.
    pub async fn unregister_handlers(
        &self,
        labels: &[TaskLabel],
    ) -> DomainResult<HashMap<TaskLabel, bool>> {
        let runtime = self.runtime().await?;
        Ok(runtime.dispatcher.unregister(labels).await)
    }

    async fn runtime(&self) -> DomainResult<Arc<Runtime>> {
        self.core
            .runtime
            .read()
            .await
            .clone()
            .ok_or(SchedulerError::NotInitialized("call init_modules first"))
    }

    /// Submit a batch of messages.
    ///
    /// Priority-1 labels are handled inline before this returns (their
    /// web-log events therefore precede any derived work); the rest are
    /// queued for the consumer.
    #[instrument(skip_all, fields(count = messages.len()), err)]
    pub async fn submit_messages(&self, messages: Vec<ScheduleMessage>) -> DomainResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let runtime = self.runtime().await?;

        let mut immediate: Vec<ScheduleMessage> = Vec::new();
        let mut queued: Vec<ScheduleMessage> = Vec::new();
        for msg in messages {
            self.core
                .metrics
                .task_enqueued(&msg.user_id, msg.label.as_str());
            self.core
                .status
                .task_submitted(
                    &msg.item_id,
                    &msg.user_id,
                    msg.label,
                    &msg.mem_cube_id,
                    msg.task_id.clone(),
                )
                .await;

            if self.core.config.is_handler_disabled(msg.label.as_str()) {
                info!(label = %msg.label, item_id = %msg.item_id, "handler disabled, skipping");
                continue;
            }

            if runtime.dispatcher.priority_for(msg.label).await == PriorityLevel::Level1 {
                immediate.push(msg);
            } else {
                queued.push(msg);
            }
        }

        if !immediate.is_empty() {
            let now = chrono::Utc::now();
            for msg in &mut immediate {
                let wait = msg.mark_dequeued(now);
                self.core.metrics.queue_wait_ms.observe(wait);
                self.core
                    .metrics
                    .task_dequeued(&msg.user_id, msg.label.as_str());
            }
            // One handler invocation per (user, cube, label) group.
            let mut groups: Vec<((String, String, TaskLabel), Vec<ScheduleMessage>)> = Vec::new();
            for msg in immediate {
                let key = (msg.user_id.clone(), msg.mem_cube_id.clone(), msg.label);
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, group)) => group.push(msg),
                    None => groups.push((key, vec![msg])),
                }
            }
            for ((user_id, mem_cube_id, label), group) in groups {
                runtime
                    .dispatcher
                    .execute_inline(&user_id, &mem_cube_id, label, group)
                    .await;
            }
        }

        if !queued.is_empty() {
            runtime.queue.submit(queued).await;
        }
        Ok(())
    }

    /// Start the consumer and the metrics monitor loop.
    pub async fn start(&self) -> DomainResult<()> {
        let _ = self.runtime().await?;
        if self.core.running.swap(true, Ordering::AcqRel) {
            warn!("scheduler consumer already running");
            return Ok(());
        }
        if self.core.config.enable_parallel_dispatch {
            info!(
                workers = self.core.config.thread_pool_max_workers,
                "initializing dispatcher worker pool"
            );
        }

        let mut handles = self.core.handles.lock().await;
        let consumer_core = self.core.clone();
        handles.consumer = Some(match self.core.config.consumer_mode {
            ConsumerMode::Shared => {
                ConsumerHandle::Task(tokio::spawn(consumer_loop(consumer_core)))
            }
            ConsumerMode::Isolated => {
                // A dedicated OS thread with its own runtime isolates
                // CPU-bound handler work from the caller's runtime.
                ConsumerHandle::Thread(std::thread::Builder::new()
                    .name("memloom-consumer".to_string())
                    .spawn(move || {
                        let rt = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                            .expect("consumer runtime");
                        rt.block_on(consumer_loop(consumer_core));
                    })
                    .map_err(|e| SchedulerError::Config(format!("consumer thread: {e}")))?)
            }
        });

        let monitor_core = self.core.clone();
        handles.monitor = Some(tokio::spawn(monitor_loop(monitor_core)));
        info!(mode = ?self.core.config.consumer_mode, "scheduler consumer started");
        Ok(())
    }

    /// Stop the consumer and monitor loops and drain the dispatcher.
    pub async fn stop(&self) {
        if !self.core.running.swap(false, Ordering::AcqRel) {
            warn!("scheduler is not running");
            return;
        }
        let mut handles = self.core.handles.lock().await;
        match handles.consumer.take() {
            Some(ConsumerHandle::Task(handle)) => {
                if tokio::time::timeout(SHUTDOWN_DRAIN, handle).await.is_err() {
                    warn!("consumer task did not stop in time");
                }
            }
            Some(ConsumerHandle::Thread(handle)) => {
                let joined = tokio::task::spawn_blocking(move || handle.join());
                match tokio::time::timeout(SHUTDOWN_DRAIN, joined).await {
                    Ok(Ok(Ok(()))) => {}
                    _ => warn!("consumer thread did not stop gracefully"),
                }
            }
            None => {}
        }
        if let Some(handle) = handles.monitor.take() {
            handle.abort();
        }
        if let Ok(runtime) = self.runtime().await {
            info!("shutting down dispatcher");
            runtime.dispatcher.shutdown(SHUTDOWN_DRAIN).await;
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    /// Drain normalized web-log events (when no broker is configured).
    pub async fn web_log_events(&self) -> Vec<WebLogEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.web_log.drain().await,
            Err(_) => Vec::new(),
        }
    }

    /// Lifecycle record for a submitted message.
    pub async fn task_status(&self, item_id: &str) -> Option<TaskStatusRecord> {
        self.core.status.get(item_id).await
    }

    /// Best-effort cancellation of a submitted message.
    pub async fn cancel_task(&self, item_id: &str) -> bool {
        self.core.status.cancel(item_id).await
    }

    /// Snapshot of in-flight handler invocations.
    pub async fn running_tasks(&self) -> HashMap<String, RunningTaskInfo> {
        match self.runtime().await {
            Ok(runtime) => runtime.dispatcher.running_tasks().await,
            Err(_) => HashMap::new(),
        }
    }

    /// The enhancement pipeline, for callers running fine search flows.
    pub async fn enhancement_pipeline(&self) -> Option<Arc<EnhancementPipeline>> {
        self.runtime().await.ok().map(|rt| rt.enhancement.clone())
    }

    /// Current queue depths.
    pub async fn queue_sizes(&self) -> QueueSizes {
        match self.runtime().await {
            Ok(runtime) => runtime.queue.qsize().await,
            Err(_) => QueueSizes::default(),
        }
    }

    /// Forward handler follow-ups back into the submit path.
    async fn spawn_followup_pump(&self) {
        let Some(mut rx) = self.core.followup_rx.lock().await.take() else {
            return;
        };
        let weak = Arc::downgrade(&self.core);
        tokio::spawn(async move {
            while let Some(messages) = rx.recv().await {
                let Some(core) = weak.upgrade() else {
                    break;
                };
                let scheduler = MemScheduler { core };
                if let Err(e) = scheduler.submit_messages(messages).await {
                    error!(error = %e, "follow-up submission failed");
                }
            }
            debug!("follow-up pump exited");
        });
    }
}

async fn consumer_loop(core: Arc<SchedulerCore>) {
    let interval = core.config.consume_interval();
    let batch_size = core.config.consume_batch;
    while core.running.load(Ordering::Acquire) {
        let runtime = core.runtime.read().await.clone();
        let Some(runtime) = runtime else {
            tokio::time::sleep(interval).await;
            continue;
        };

        // Soft backpressure: full pool means no pull this tick.
        if core.config.enable_parallel_dispatch
            && runtime.dispatcher.running_task_count() >= runtime.dispatcher.max_workers()
        {
            tokio::time::sleep(interval).await;
            continue;
        }

        let mut messages = runtime.queue.get(batch_size).await;
        if !messages.is_empty() {
            let now = chrono::Utc::now();
            for msg in &mut messages {
                let wait = msg.mark_dequeued(now);
                core.metrics.queue_wait_ms.observe(wait);
                core.metrics.task_dequeued(&msg.user_id, msg.label.as_str());
            }
            runtime.dispatcher.dispatch(messages).await;
        }
        tokio::time::sleep(interval).await;
    }
    debug!("consumer loop exited");
}

async fn monitor_loop(core: Arc<SchedulerCore>) {
    loop {
        tokio::time::sleep(MONITOR_INTERVAL).await;
        if !core.running.load(Ordering::Acquire) {
            break;
        }
        let runtime = core.runtime.read().await.clone();
        let Some(runtime) = runtime else { continue };
        let sizes = runtime.queue.qsize().await;
        let mut per_user: HashMap<String, usize> = HashMap::new();
        for (stream_key, length) in &sizes.per_stream {
            // stream key is "{user}:{cube}:{label}"; user ids may themselves
            // contain ':' so strip the two trailing segments.
            let user_id = stream_key
                .rsplitn(3, ':')
                .nth(2)
                .unwrap_or(stream_key.as_str());
            *per_user.entry(user_id.to_string()).or_insert(0) += length;
        }
        for (user_id, length) in per_user {
            core.metrics.update_queue_length(&user_id, length);
        }
    }
    debug!("metrics monitor loop exited");
}
