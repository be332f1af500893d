//! Keeps permission rows in step with the objects they protect.
//!
//! When an object is removed its rows go with it; when it is moved or renamed
//! its rows are rewritten under the new path. Lifecycle prolongations share
//! the same path matching but never touch permission rows.

use std::sync::Arc;

use chrono::{Duration, Utc};
use pathgrant_storage::PermissionStore;
use tracing::{debug, info, instrument};

use crate::batch::{touched_sids, BatchConfig};
use crate::collaborators::{require_storage, StorageCatalog};
use crate::error::{DomainError, DomainResult};
use crate::gate::WriteGate;
use crate::index::ReadAllowedStorageIndex;
use crate::model::{PathRef, PathType, PermissionKey, StorageId, StorageRef, StoredProlongation};
use crate::path::{is_strict_descendant, normalize, normalize_ref};

/// Cascading delete, move and prolongation of path-level state.
pub struct PathMigrator<S: ?Sized> {
    store: Arc<S>,
    catalog: Arc<dyn StorageCatalog>,
    gate: Arc<WriteGate>,
    index: Arc<ReadAllowedStorageIndex<S>>,
    config: BatchConfig,
}

impl<S: PermissionStore + ?Sized> PathMigrator<S> {
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

    /// Removes the rows governed by `root`: for a FOLDER the folder row and
    /// every row beneath it, for a FILE only the FILE rows at that path.
    pub async fn delete_all(
        &self,
        storage: StorageRef,
        root: PathRef,
    ) -> DomainResult<Vec<PermissionKey>> {
        self.delete_all_batch(storage, vec![root]).await
    }

    /// [`delete_all`](Self::delete_all) for several roots, applied as one unit.
    #[instrument(skip(self, roots), fields(storage_id = storage.id, count = roots.len()))]
    pub async fn delete_all_batch(
        &self,
        storage: StorageRef,
        roots: Vec<PathRef>,
    ) -> DomainResult<Vec<PermissionKey>> {
        self.config.check_size(roots.len())?;
        let roots = roots
            .iter()
            .map(normalize_ref)
            .collect::<DomainResult<Vec<_>>>()?;
        let storage = require_storage(self.catalog.as_ref(), storage).await?;

        let _guard = self.gate.acquire(storage.id).await;
        let removed = self.store.delete_trees(storage.id, &roots).await?;
        let sids = touched_sids(removed.iter().map(|key| &key.sid));
        self.index.invalidate_for_write(storage.id, &sids).await;

        info!(
            storage_id = storage.id,
            roots = roots.len(),
            rows = removed.len(),
            "deleted permission trees"
        );
        Ok(removed)
    }

    /// Rewrites every row governed by `source` to live under `destination`.
    ///
    /// All rows move or none do. Fails with [`DomainError::MoveConflict`] if
    /// the destination already holds rows. Returns the number of rows moved.
    #[instrument(skip(self, source, destination), fields(storage_id = storage.id))]
    pub async fn move_path(
        &self,
        storage: StorageRef,
        source: PathRef,
        destination: PathRef,
    ) -> DomainResult<usize> {
        if source.path_type != destination.path_type {
            return Err(DomainError::InvalidInput {
                message: format!(
                    "cannot move {} '{}' to {} '{}'",
                    source.path_type, source.path, destination.path_type, destination.path
                ),
            });
        }
        let source = normalize_ref(&source)?;
        let destination = normalize_ref(&destination)?;
        if source == destination {
            debug!(path = %source.path, "move to same path, nothing to do");
            return Ok(0);
        }
        if source.path_type == PathType::Folder
            && is_strict_descendant(&destination.path, &source.path)
        {
            return Err(DomainError::InvalidInput {
                message: format!(
                    "cannot move folder '{}' into its own subtree '{}'",
                    source.path, destination.path
                ),
            });
        }
        let storage = require_storage(self.catalog.as_ref(), storage).await?;

        let _guard = self.gate.acquire(storage.id).await;
        let moved = self
            .store
            .move_tree(storage.id, &source, &destination)
            .await?;
        if moved > 0 {
            self.index.invalidate_for_write(storage.id, &[]).await;
        }

        info!(
            storage_id = storage.id,
            source = %source.path,
            destination = %destination.path,
            rows = moved,
            "moved permissions"
        );
        Ok(moved)
    }

    /// Records a lifecycle prolongation of `days` days for `path`.
    pub async fn prolong(
        &self,
        storage: StorageRef,
        path: &str,
        user_id: &str,
        days: u32,
    ) -> DomainResult<StoredProlongation> {
        let mut stored = self
            .prolong_batch(storage, vec![path.to_string()], user_id, days)
            .await?;
        stored.pop().ok_or_else(|| DomainError::InvalidInput {
            message: "prolongation produced no record".to_string(),
        })
    }

    /// Records the same prolongation for every path in `paths`.
    #[instrument(skip(self, paths), fields(storage_id = storage.id, count = paths.len()))]
    pub async fn prolong_batch(
        &self,
        storage: StorageRef,
        paths: Vec<String>,
        user_id: &str,
        days: u32,
    ) -> DomainResult<Vec<StoredProlongation>> {
        self.config.check_size(paths.len())?;
        if days == 0 {
            return Err(DomainError::InvalidInput {
                message: "days to prolong must be positive".to_string(),
            });
        }
        if user_id.trim().is_empty() {
            return Err(DomainError::InvalidInput {
                message: "user id cannot be empty".to_string(),
            });
        }
        let paths = paths
            .iter()
            .map(|p| normalize(p))
            .collect::<DomainResult<Vec<_>>>()?;
        let now = Utc::now();
        let prolonged_until = Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| DomainError::InvalidInput {
                message: format!("cannot prolong by {days} days"),
            })?;
        let storage = require_storage(self.catalog.as_ref(), storage).await?;

        let records = paths
            .into_iter()
            .map(|path| StoredProlongation {
                storage_id: storage.id,
                path,
                user_id: user_id.to_string(),
                prolonged_until,
                days,
                updated: now,
            })
            .collect();

        let _guard = self.gate.acquire(storage.id).await;
        let stored = self.store.upsert_prolongations(storage.id, records).await?;

        info!(storage_id = storage.id, paths = stored.len(), days, "prolonged paths");
        Ok(stored)
    }

    /// Most specific prolongation covering `path`, from the path itself or
    /// its nearest ancestor folder that has one.
    pub async fn find_prolongation(
        &self,
        storage_id: StorageId,
        path: &str,
    ) -> DomainResult<Option<StoredProlongation>> {
        let path = normalize(path)?;
        Ok(self.store.find_prolongation(storage_id, &path).await?)
    }
}
