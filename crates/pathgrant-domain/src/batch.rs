//! Bulk insert, delete and load of permission rows for one storage.
//!
//! Every batch is validated in full before the store is touched, so a bad
//! item rejects the whole batch with no partial write.

use std::collections::BTreeSet;
use std::sync::Arc;

use pathgrant_storage::traits::validate_sid;
use pathgrant_storage::PermissionStore;
use tracing::{debug, info, instrument};

use crate::collaborators::{require_storage, StorageCatalog};
use crate::error::{DomainError, DomainResult};
use crate::gate::WriteGate;
use crate::index::ReadAllowedStorageIndex;
use crate::model::{GrantRequest, PathRef, PermissionKey, Sid, StorageRef, StoredPermission};
use crate::path::{normalize, normalize_ref};

/// Default maximum number of items in one batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Limits applied to batch requests.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl BatchConfig {
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Rejects empty batches and batches above the limit.
    pub fn check_size(&self, size: usize) -> DomainResult<()> {
        if size == 0 {
            return Err(DomainError::EmptyBatch);
        }
        if size > self.max_batch_size {
            return Err(DomainError::BatchTooLarge {
                size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }
}

pub(crate) fn check_sid(sid: &Sid) -> DomainResult<()> {
    validate_sid(sid).map_err(|e| DomainError::InvalidInput {
        message: e.to_string(),
    })
}

/// Distinct sids of a set of keys.
pub(crate) fn touched_sids<'a>(sids: impl IntoIterator<Item = &'a Sid>) -> Vec<Sid> {
    sids.into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect()
}

/// Executes permission batches scoped to one storage per call.
pub struct BatchOperationProcessor<S: ?Sized> {
    store: Arc<S>,
    catalog: Arc<dyn StorageCatalog>,
    gate: Arc<WriteGate>,
    index: Arc<ReadAllowedStorageIndex<S>>,
    config: BatchConfig,
}

impl<S: PermissionStore + ?Sized> BatchOperationProcessor<S> {
    pub fn new(
        store: Arc<S>,
        catalog: Arc<dyn StorageCatalog>,
        gate: Arc<WriteGate>,
        index: Arc<ReadAllowedStorageIndex<S>>,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            gate,
            index,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Upserts all `requests` in one transaction. A key repeated inside the
    /// batch keeps its last mask. Returns the rows as stored.
    #[instrument(skip(self, requests), fields(storage_id = storage.id, count = requests.len()))]
    pub async fn insert_batch(
        &self,
        storage: StorageRef,
        requests: Vec<GrantRequest>,
    ) -> DomainResult<Vec<StoredPermission>> {
        self.config.check_size(requests.len())?;
        let entries = requests
            .into_iter()
            .map(into_permission)
            .collect::<DomainResult<Vec<_>>>()?;
        let storage = require_storage(self.catalog.as_ref(), storage).await?;

        let _guard = self.gate.acquire(storage.id).await;
        let stored = self.store.upsert_permissions(&storage, entries).await?;
        let sids = touched_sids(stored.iter().map(|row| &row.sid));
        self.index.invalidate_for_write(storage.id, &sids).await;

        info!(storage_id = storage.id, rows = stored.len(), "inserted permissions");
        Ok(stored)
    }

    /// Removes exact rows. Keys without a row are skipped. Returns the keys
    /// actually removed.
    #[instrument(skip(self, keys), fields(storage_id = storage.id, count = keys.len()))]
    pub async fn delete_batch(
        &self,
        storage: StorageRef,
        keys: Vec<PermissionKey>,
    ) -> DomainResult<Vec<PermissionKey>> {
        self.config.check_size(keys.len())?;
        let keys = keys
            .into_iter()
            .map(normalize_key)
            .collect::<DomainResult<Vec<_>>>()?;
        let storage = require_storage(self.catalog.as_ref(), storage).await?;

        let _guard = self.gate.acquire(storage.id).await;
        let removed = self.store.delete_permissions(storage.id, keys).await?;
        let sids = touched_sids(removed.iter().map(|key| &key.sid));
        self.index.invalidate_for_write(storage.id, &sids).await;

        info!(storage_id = storage.id, rows = removed.len(), "deleted permissions");
        Ok(removed)
    }

    /// Returns the rows stored at exactly each `(path, type)`, for all sids.
    /// Ancestors are not consulted.
    #[instrument(skip(self, paths), fields(storage_id = storage.id, count = paths.len()))]
    pub async fn load_batch(
        &self,
        storage: StorageRef,
        paths: Vec<PathRef>,
    ) -> DomainResult<Vec<StoredPermission>> {
        self.config.check_size(paths.len())?;
        let paths = paths
            .iter()
            .map(normalize_ref)
            .collect::<DomainResult<BTreeSet<_>>>()?;
        let storage = require_storage(self.catalog.as_ref(), storage).await?;

        let paths: Vec<PathRef> = paths.into_iter().collect();
        let rows = self.store.load_permissions(storage.id, &paths).await?;
        debug!(storage_id = storage.id, rows = rows.len(), "loaded permissions");
        Ok(rows)
    }
}

fn into_permission(request: GrantRequest) -> DomainResult<StoredPermission> {
    let path = normalize(&request.path)?;
    check_sid(&request.sid)?;
    if request.mask.is_empty() {
        return Err(DomainError::InvalidInput {
            message: format!("mask cannot be zero for {} '{}'", request.path_type, path),
        });
    }
    Ok(StoredPermission::new(
        path,
        request.path_type,
        request.sid,
        request.mask,
    ))
}

fn normalize_key(key: PermissionKey) -> DomainResult<PermissionKey> {
    let path = normalize(&key.path)?;
    check_sid(&key.sid)?;
    Ok(PermissionKey::new(path, key.path_type, key.sid))
}
