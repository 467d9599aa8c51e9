//! Monitor snapshot persistence port.
//!
//! Monitor state (query history + working set) is serialized to durable
//! storage at read/write boundaries so concurrent handlers for the same user
//! observe a consistent snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::StoreError;
use crate::domain::models::{QueryRecord, WorkingMemoryEntry};

/// Serialized monitor state for one (user, cube).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    #[serde(default)]
    pub queries: Vec<QueryRecord>,
    #[serde(default)]
    pub working: Vec<WorkingMemoryEntry>,
}

/// Port over the monitor snapshot store.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn load(&self, user_id: &str, mem_cube_id: &str)
        -> Result<Option<MonitorSnapshot>, StoreError>;

    async fn save(
        &self,
        user_id: &str,
        mem_cube_id: &str,
        snapshot: &MonitorSnapshot,
    ) -> Result<(), StoreError>;
}
