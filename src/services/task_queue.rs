//! Task queue: bounded FIFO per `(user, cube, label)` stream.
//!
//! FIFO holds *within* a stream key only; batches are popped fair-weighted
//! across streams (round robin) so one chatty user cannot head-of-line block
//! the rest. Delivery is at-least-once in process: duplicates may appear
//! after a crash, so handlers are idempotent on `item_id`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::models::{OverflowPolicy, ScheduleMessage};
use crate::domain::ports::SharedLogClient;

use super::metrics::MetricsRegistry;
use super::status_tracker::StatusTracker;

/// Per-stream and aggregate queue depths.
#[derive(Debug, Clone, Default)]
pub struct QueueSizes {
    pub per_stream: HashMap<String, usize>,
    pub total: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    streams: HashMap<String, VecDeque<ScheduleMessage>>,
    /// Round-robin rotation over stream keys with pending messages.
    rotation: VecDeque<String>,
    total: usize,
}

enum Backend {
    Memory(Mutex<MemoryState>),
    Shared(SharedBackend),
}

struct SharedBackend {
    client: Arc<dyn SharedLogClient>,
    known_streams: Mutex<Vec<String>>,
}

/// The scheduler's task queue.
pub struct TaskQueue {
    backend: Backend,
    stream_capacity: usize,
    overflow_policy: OverflowPolicy,
    status: Arc<StatusTracker>,
    metrics: Arc<MetricsRegistry>,
}

impl TaskQueue {
    /// In-process bounded queue.
    pub fn in_memory(
        stream_capacity: usize,
        overflow_policy: OverflowPolicy,
        status: Arc<StatusTracker>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(MemoryState::default())),
            stream_capacity: stream_capacity.max(1),
            overflow_policy,
            status,
            metrics,
        }
    }

    /// Shared streaming-log queue with cross-process visibility.
    pub fn shared(
        client: Arc<dyn SharedLogClient>,
        stream_capacity: usize,
        overflow_policy: OverflowPolicy,
        status: Arc<StatusTracker>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            backend: Backend::Shared(SharedBackend {
                client,
                known_streams: Mutex::new(Vec::new()),
            }),
            stream_capacity: stream_capacity.max(1),
            overflow_policy,
            status,
            metrics,
        }
    }

    /// Enqueue a batch. Never blocks: overflow either evicts the oldest
    /// queued message or drops the incoming one, per policy, and records the
    /// victim as `Dropped`. Returns the number of accepted messages.
    pub async fn submit(&self, messages: Vec<ScheduleMessage>) -> usize {
        match &self.backend {
            Backend::Memory(state) => self.submit_memory(state, messages).await,
            Backend::Shared(shared) => self.submit_shared(shared, messages).await,
        }
    }

    async fn submit_memory(
        &self,
        state: &Mutex<MemoryState>,
        messages: Vec<ScheduleMessage>,
    ) -> usize {
        let mut accepted = 0;
        // Eviction bookkeeping happens outside the lock.
        let mut dropped: Vec<ScheduleMessage> = Vec::new();
        {
            let mut guard = state.lock().await;
            let MemoryState {
                streams,
                rotation,
                total,
            } = &mut *guard;
            for msg in messages {
                let key = msg.stream_key();
                let stream = streams.entry(key.clone()).or_default();
                if stream.len() >= self.stream_capacity {
                    match self.overflow_policy {
                        OverflowPolicy::DropOldest => {
                            if let Some(evicted) = stream.pop_front() {
                                *total -= 1;
                                dropped.push(evicted);
                            }
                        }
                        OverflowPolicy::Reject => {
                            warn!(stream_key = %key, "stream full, rejecting submission");
                            dropped.push(msg);
                            continue;
                        }
                    }
                }
                stream.push_back(msg);
                *total += 1;
                if !rotation.contains(&key) {
                    rotation.push_back(key);
                }
                accepted += 1;
            }
        }
        for victim in dropped {
            warn!(
                item_id = %victim.item_id,
                stream_key = %victim.stream_key(),
                "message dropped on stream overflow"
            );
            self.status.task_dropped(&victim.item_id).await;
            self.metrics
                .task_dropped(&victim.user_id, victim.label.as_str());
        }
        accepted
    }

    async fn submit_shared(&self, shared: &SharedBackend, messages: Vec<ScheduleMessage>) -> usize {
        let mut accepted = 0;
        for msg in messages {
            let key = msg.stream_key();
            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(item_id = %msg.item_id, error = %e, "failed to serialize message");
                    self.status.task_dropped(&msg.item_id).await;
                    continue;
                }
            };
            match shared.client.xadd(&key, &payload).await {
                Ok(_) => {
                    let mut known = shared.known_streams.lock().await;
                    if !known.contains(&key) {
                        known.push(key);
                    }
                    accepted += 1;
                }
                Err(e) => {
                    warn!(item_id = %msg.item_id, error = %e, "shared log append failed");
                    self.status.task_dropped(&msg.item_id).await;
                    self.metrics.task_dropped(&msg.user_id, msg.label.as_str());
                }
            }
        }
        accepted
    }

    /// Pop up to `batch_size` messages, one per stream per rotation pass.
    pub async fn get(&self, batch_size: usize) -> Vec<ScheduleMessage> {
        if batch_size == 0 {
            return Vec::new();
        }
        match &self.backend {
            Backend::Memory(state) => {
                let mut guard = state.lock().await;
                let MemoryState {
                    streams,
                    rotation,
                    total,
                } = &mut *guard;
                let mut popped = Vec::with_capacity(batch_size);
                while popped.len() < batch_size && !rotation.is_empty() {
                    let Some(key) = rotation.pop_front() else {
                        break;
                    };
                    let Some(stream) = streams.get_mut(&key) else {
                        continue;
                    };
                    if let Some(msg) = stream.pop_front() {
                        *total -= 1;
                        popped.push(msg);
                    }
                    if stream.is_empty() {
                        streams.remove(&key);
                    } else {
                        rotation.push_back(key);
                    }
                }
                popped
            }
            Backend::Shared(shared) => {
                let keys = shared.known_streams.lock().await.clone();
                if keys.is_empty() {
                    return Vec::new();
                }
                let entries = match shared.client.xread(&keys, batch_size).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        debug!(error = %e, "shared log read failed");
                        return Vec::new();
                    }
                };
                let mut popped = Vec::with_capacity(entries.len());
                for entry in entries {
                    match serde_json::from_str::<ScheduleMessage>(&entry.payload) {
                        Ok(msg) => {
                            if let Err(e) =
                                shared.client.xack(&entry.stream_key, &entry.entry_id).await
                            {
                                warn!(error = %e, "shared log ack failed");
                            }
                            popped.push(msg);
                        }
                        Err(e) => {
                            warn!(
                                stream_key = %entry.stream_key,
                                error = %e,
                                "skipping unparseable queue entry"
                            );
                            let _ = shared.client.xack(&entry.stream_key, &entry.entry_id).await;
                        }
                    }
                }
                popped
            }
        }
    }

    /// Current per-stream and aggregate sizes.
    pub async fn qsize(&self) -> QueueSizes {
        match &self.backend {
            Backend::Memory(state) => {
                let state = state.lock().await;
                QueueSizes {
                    per_stream: state
                        .streams
                        .iter()
                        .map(|(k, v)| (k.clone(), v.len()))
                        .collect(),
                    total: state.total,
                }
            }
            Backend::Shared(shared) => {
                let keys = shared.known_streams.lock().await.clone();
                let mut sizes = QueueSizes::default();
                for key in keys {
                    match shared.client.stream_len(&key).await {
                        Ok(len) => {
                            sizes.total += len;
                            sizes.per_stream.insert(key, len);
                        }
                        Err(e) => debug!(stream_key = %key, error = %e, "stream_len failed"),
                    }
                }
                sizes
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskLabel;

    fn queue(capacity: usize, policy: OverflowPolicy) -> TaskQueue {
        TaskQueue::in_memory(
            capacity,
            policy,
            Arc::new(StatusTracker::new()),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn msg(user: &str, label: TaskLabel, content: &str) -> ScheduleMessage {
        ScheduleMessage::new(user, "cube", label, content)
    }

    #[tokio::test]
    async fn test_fifo_within_stream() {
        let queue = queue(100, OverflowPolicy::DropOldest);
        for i in 0..5 {
            queue
                .submit(vec![msg("u1", TaskLabel::MemoryUpdate, &i.to_string())])
                .await;
        }
        let popped = queue.get(5).await;
        let contents: Vec<&str> = popped.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_round_robin_across_streams() {
        let queue = queue(100, OverflowPolicy::DropOldest);
        queue
            .submit(vec![
                msg("u1", TaskLabel::MemoryUpdate, "a1"),
                msg("u1", TaskLabel::MemoryUpdate, "a2"),
                msg("u2", TaskLabel::MemoryUpdate, "b1"),
            ])
            .await;
        let popped = queue.get(3).await;
        let contents: Vec<&str> = popped.iter().map(|m| m.content.as_str()).collect();
        // One message per stream per pass: u1, u2, then u1 again.
        assert_eq!(contents, vec!["a1", "b1", "a2"]);
    }

    #[tokio::test]
    async fn test_drop_oldest_on_overflow() {
        let status = Arc::new(StatusTracker::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = TaskQueue::in_memory(
            2,
            OverflowPolicy::DropOldest,
            status.clone(),
            metrics.clone(),
        );
        let first = msg("u1", TaskLabel::MemoryUpdate, "old");
        let first_id = first.item_id.clone();
        status
            .task_submitted(&first_id, "u1", TaskLabel::MemoryUpdate, "cube", None)
            .await;
        queue.submit(vec![first]).await;
        queue
            .submit(vec![msg("u1", TaskLabel::MemoryUpdate, "mid")])
            .await;
        queue
            .submit(vec![msg("u1", TaskLabel::MemoryUpdate, "new")])
            .await;

        let sizes = queue.qsize().await;
        assert_eq!(sizes.total, 2);
        let popped = queue.get(10).await;
        let contents: Vec<&str> = popped.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["mid", "new"]);
        // The evicted message reached a terminal state.
        let record = status.get(&first_id).await.unwrap();
        assert_eq!(record.state.as_str(), "dropped");
        assert_eq!(metrics.dropped_count("u1", "memory_update"), 1);
    }

    #[tokio::test]
    async fn test_reject_policy_drops_incoming() {
        let queue = queue(1, OverflowPolicy::Reject);
        queue
            .submit(vec![msg("u1", TaskLabel::MemoryUpdate, "kept")])
            .await;
        let accepted = queue
            .submit(vec![msg("u1", TaskLabel::MemoryUpdate, "rejected")])
            .await;
        assert_eq!(accepted, 0);
        let popped = queue.get(10).await;
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].content, "kept");
    }

    #[tokio::test]
    async fn test_qsize_per_stream() {
        let queue = queue(100, OverflowPolicy::DropOldest);
        queue
            .submit(vec![
                msg("u1", TaskLabel::MemoryUpdate, "a"),
                msg("u1", TaskLabel::MemRead, "b"),
                msg("u1", TaskLabel::MemRead, "c"),
            ])
            .await;
        let sizes = queue.qsize().await;
        assert_eq!(sizes.total, 3);
        assert_eq!(sizes.per_stream.get("u1:cube:mem_read"), Some(&2));
        assert_eq!(sizes.per_stream.get("u1:cube:memory_update"), Some(&1));
    }

    #[tokio::test]
    async fn test_get_on_empty_queue() {
        let queue = queue(10, OverflowPolicy::DropOldest);
        assert!(queue.get(5).await.is_empty());
        assert_eq!(queue.qsize().await.total, 0);
    }
}
