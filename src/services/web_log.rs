//! Web-log plane.
//!
//! Handlers emit structured events describing memory changes. When a broker
//! is configured events are published to it; otherwise they accumulate in a
//! bounded in-memory ring (drop oldest on overflow) and are drained by the
//! caller. The log is advisory: publish failures drop the event and never
//! reach handlers.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::domain::models::{WebLogEvent, WebLogLabel};
use crate::domain::ports::LogBroker;

/// Bounded event sink for the external log plane.
pub struct WebLogPlane {
    ring: Mutex<VecDeque<WebLogEvent>>,
    max_size: usize,
    broker: Option<Arc<dyn LogBroker>>,
}

impl WebLogPlane {
    pub fn new(max_size: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
            broker: None,
        }
    }

    pub fn with_broker(max_size: usize, broker: Arc<dyn LogBroker>) -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
            broker: Some(broker),
        }
    }

    /// Submit events to the plane.
    pub async fn submit(&self, events: Vec<WebLogEvent>) {
        for event in events {
            if let Some(broker) = &self.broker {
                match broker.publish(&event).await {
                    Ok(()) => {
                        debug!(
                            item_id = %event.item_id,
                            label = %event.label,
                            "web log event published"
                        );
                        continue;
                    }
                    Err(e) => {
                        error!(
                            item_id = %event.item_id,
                            label = %event.label,
                            error = %e,
                            "web log publish failed, dropping event"
                        );
                        continue;
                    }
                }
            }
            let mut ring = self.ring.lock().await;
            if ring.len() >= self.max_size {
                ring.pop_front();
            }
            ring.push_back(event);
        }
    }

    /// Drain all queued events, normalized for the external consumer:
    /// metadata rows gain a `memory_time` field mirroring `updated_at`.
    pub async fn drain(&self) -> Vec<WebLogEvent> {
        let mut ring = self.ring.lock().await;
        ring.drain(..).map(normalize_event).collect()
    }

    pub async fn len(&self) -> usize {
        self.ring.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ring.lock().await.is_empty()
    }
}

fn normalize_event(mut event: WebLogEvent) -> WebLogEvent {
    for meta in &mut event.metadata {
        if let Some(obj) = meta.as_object_mut() {
            if !obj.contains_key("memory_time") {
                let time = obj
                    .get("updated_at")
                    .or_else(|| obj.get("update_at"))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                obj.insert("memory_time".to_string(), time);
            }
        }
    }
    event.memory_len = event.memcube_log_content.memory_len(event.label);
    event
}

/// Count events of a given label in a slice; test and diagnostics helper.
pub fn count_label(events: &[WebLogEvent], label: WebLogLabel) -> usize {
    events.iter().filter(|e| e.label == label).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::StoreError;
    use crate::domain::models::{LogBody, LogContentEntry, LONG_TERM_MEMORY_TYPE, USER_INPUT_TYPE};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(label: WebLogLabel) -> WebLogEvent {
        WebLogEvent::new(
            label,
            USER_INPUT_TYPE,
            LONG_TERM_MEMORY_TYPE,
            "u1",
            "c1",
            LogBody::Entries(vec![LogContentEntry::default()]),
        )
    }

    #[tokio::test]
    async fn test_ring_drop_oldest() {
        let plane = WebLogPlane::new(2);
        plane.submit(vec![event(WebLogLabel::AddMessage)]).await;
        plane.submit(vec![event(WebLogLabel::AddMemory)]).await;
        plane.submit(vec![event(WebLogLabel::MergeMemory)]).await;
        let drained = plane.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].label, WebLogLabel::AddMemory);
        assert_eq!(drained[1].label, WebLogLabel::MergeMemory);
    }

    #[tokio::test]
    async fn test_drain_enriches_memory_time() {
        let plane = WebLogPlane::new(10);
        let mut ev = event(WebLogLabel::UpdateMemory);
        ev.metadata = vec![serde_json::json!({"updated_at": "2026-01-01T00:00:00Z"})];
        plane.submit(vec![ev]).await;
        let drained = plane.drain().await;
        assert_eq!(
            drained[0].metadata[0]["memory_time"],
            serde_json::json!("2026-01-01T00:00:00Z")
        );
    }

    struct FlakyBroker {
        published: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LogBroker for FlakyBroker {
        async fn publish(&self, _event: &WebLogEvent) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Io("broker down".to_string()));
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broker_publish_bypasses_ring() {
        let broker = Arc::new(FlakyBroker {
            published: AtomicUsize::new(0),
            fail: false,
        });
        let plane = WebLogPlane::with_broker(10, broker.clone());
        plane.submit(vec![event(WebLogLabel::AddMessage)]).await;
        assert_eq!(broker.published.load(Ordering::SeqCst), 1);
        assert!(plane.is_empty().await);
    }

    #[tokio::test]
    async fn test_broker_failure_drops_event() {
        let broker = Arc::new(FlakyBroker {
            published: AtomicUsize::new(0),
            fail: true,
        });
        let plane = WebLogPlane::with_broker(10, broker);
        plane.submit(vec![event(WebLogLabel::AddMessage)]).await;
        // Advisory plane: the failed event is gone, nothing queued.
        assert!(plane.is_empty().await);
    }
}
