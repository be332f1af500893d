//! Per-storage write serialization.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::StorageId;

/// Hands out one async mutex per storage.
///
/// Writers on the same storage queue behind each other; writers on different
/// storages never contend.
#[derive(Debug, Default)]
pub struct WriteGate {
    locks: DashMap<StorageId, Arc<Mutex<()>>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive write access to `storage_id`.
    pub async fn acquire(&self, storage_id: StorageId) -> OwnedMutexGuard<()> {
        // Clone the Arc so no map shard stays locked across the await.
        let lock = Arc::clone(self.locks.entry(storage_id).or_default().value());
        lock.lock_owned().await
    }

    /// Number of storages that have been written through this gate.
    pub fn tracked_storages(&self) -> usize {
        self.locks.len()
    }
}
