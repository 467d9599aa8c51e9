//! File-backed activation cache.
//!
//! Holds the cache entries in memory and persists them as a versioned JSON
//! snapshot, replaced atomically (temp file + rename) on every dump. Loading
//! rejects unknown schema versions rather than guessing.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::ports::{ActivationCache, ActivationItem};

/// Current on-disk schema version.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    items: Vec<ActivationItem>,
}

/// Activation cache persisted to a local file.
#[derive(Default)]
pub struct FileActivationCache {
    items: Mutex<Vec<ActivationItem>>,
}

impl FileActivationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a cache from an existing snapshot file.
    pub async fn load_from(path: &Path) -> Result<Self, StoreError> {
        let payload = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&payload)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported activation snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Self {
            items: Mutex::new(snapshot.items),
        })
    }
}

#[async_trait]
impl ActivationCache for FileActivationCache {
    async fn get_all(&self) -> Result<Vec<ActivationItem>, StoreError> {
        Ok(self.items.lock().await.clone())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.items.lock().await.clear();
        Ok(())
    }

    async fn extract(&self, composed_text: &str) -> Result<ActivationItem, StoreError> {
        Ok(ActivationItem {
            id: Uuid::new_v4().to_string(),
            composed_text: composed_text.to_string(),
            text_memories: Vec::new(),
            timestamp: Utc::now(),
        })
    }

    async fn add(&self, items: Vec<ActivationItem>) -> Result<(), StoreError> {
        self.items.lock().await.extend(items);
        Ok(())
    }

    async fn dump(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            items: self.items.lock().await.clone(),
        };
        let payload = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, payload).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}
