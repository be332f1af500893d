//! In-memory storage implementation.
//!
//! Each storage owns a [`PathTrie`] keyed by path segments, so resolving the
//! ancestor chain of a path costs O(depth) instead of a scan over every row.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::{HealthStatus, StorageError, StorageResult};
use crate::model::{
    PathRef, PermissionKey, Sid, StorageId, StorageKind, StorageRef, StoredPermission,
    StoredProlongation,
};
use crate::traits::{
    dedup_last_wins, dedup_prolongations, validate_key, validate_path, validate_permission,
    validate_prolongation, validate_storage_id, PermissionStore,
};
use crate::trie::PathTrie;

#[derive(Debug)]
struct StorageBucket {
    kind: StorageKind,
    trie: PathTrie,
}

impl StorageBucket {
    fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            trie: PathTrie::new(),
        }
    }
}

/// In-memory implementation of [`PermissionStore`].
///
/// # Performance Characteristics
///
/// - **Upsert / delete row**: O(depth) per row
/// - **find_applicable**: O(candidates x sids), each candidate an O(depth) walk
/// - **delete_trees / move_tree**: O(depth + rows in subtree) per root
/// - **storages_with_grants**: O(storages x sids)
///
/// Every mutating call holds the storage's map entry for its whole duration, so
/// a reader of the same storage sees either all of a write or none of it.
#[derive(Debug, Default)]
pub struct MemoryPermissionStore {
    storages: DashMap<StorageId, StorageBucket>,
    /// Prolongations keyed by storage, then by path.
    prolongations: DashMap<StorageId, HashMap<String, StoredProlongation>>,
}

impl MemoryPermissionStore {
    /// Creates a new in-memory permission store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory permission store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of rows held for a storage.
    pub fn row_count(&self, storage_id: StorageId) -> usize {
        self.storages
            .get(&storage_id)
            .map(|bucket| bucket.trie.len())
            .unwrap_or(0)
    }

    /// Every row of a storage, ordered by path.
    pub fn dump(&self, storage_id: StorageId) -> Vec<StoredPermission> {
        self.storages
            .get(&storage_id)
            .map(|bucket| bucket.trie.entries())
            .unwrap_or_default()
    }
}

fn check_kind(
    storage_id: StorageId,
    registered: StorageKind,
    requested: StorageKind,
) -> StorageResult<()> {
    if registered != requested {
        return Err(StorageError::StorageKindMismatch {
            storage_id,
            registered,
            requested,
        });
    }
    Ok(())
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn register_storage(&self, storage: &StorageRef) -> StorageResult<()> {
        validate_storage_id(storage.id)?;
        match self.storages.entry(storage.id) {
            Entry::Occupied(entry) => check_kind(storage.id, entry.get().kind, storage.kind),
            Entry::Vacant(entry) => {
                entry.insert(StorageBucket::new(storage.kind));
                Ok(())
            }
        }
    }

    async fn storage_kind(&self, storage_id: StorageId) -> StorageResult<Option<StorageKind>> {
        Ok(self.storages.get(&storage_id).map(|bucket| bucket.kind))
    }

    #[instrument(skip(self, entries), fields(storage_id = storage.id, count = entries.len()))]
    async fn upsert_permissions(
        &self,
        storage: &StorageRef,
        entries: Vec<StoredPermission>,
    ) -> StorageResult<Vec<StoredPermission>> {
        validate_storage_id(storage.id)?;
        for entry in &entries {
            validate_permission(entry)?;
        }
        let entries = dedup_last_wins(entries);

        let mut bucket = self
            .storages
            .entry(storage.id)
            .or_insert_with(|| StorageBucket::new(storage.kind));
        check_kind(storage.id, bucket.kind, storage.kind)?;
        for entry in &entries {
            bucket.trie.upsert(entry.clone());
        }
        debug!(rows = bucket.trie.len(), "upserted permission rows");
        Ok(entries)
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn delete_permissions(
        &self,
        storage_id: StorageId,
        keys: Vec<PermissionKey>,
    ) -> StorageResult<Vec<PermissionKey>> {
        validate_storage_id(storage_id)?;
        for key in &keys {
            validate_key(key)?;
        }
        let Some(mut bucket) = self.storages.get_mut(&storage_id) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .into_iter()
            .filter(|key| bucket.trie.remove(key))
            .collect())
    }

    async fn load_permissions(
        &self,
        storage_id: StorageId,
        paths: &[PathRef],
    ) -> StorageResult<Vec<StoredPermission>> {
        validate_storage_id(storage_id)?;
        let Some(bucket) = self.storages.get(&storage_id) else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for path in paths {
            rows.extend(bucket.trie.rows_at(&path.path, path.path_type));
        }
        Ok(rows)
    }

    async fn find_applicable(
        &self,
        storage_id: StorageId,
        candidates: &[PathRef],
        sids: &[Sid],
    ) -> StorageResult<Vec<StoredPermission>> {
        validate_storage_id(storage_id)?;
        if candidates.is_empty() || sids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .storages
            .get(&storage_id)
            .map(|bucket| bucket.trie.applicable(candidates, sids))
            .unwrap_or_default())
    }

    #[instrument(skip(self, roots), fields(roots = roots.len()))]
    async fn delete_trees(
        &self,
        storage_id: StorageId,
        roots: &[PathRef],
    ) -> StorageResult<Vec<PermissionKey>> {
        validate_storage_id(storage_id)?;
        for root in roots {
            validate_path(&root.path)?;
        }
        let Some(mut bucket) = self.storages.get_mut(&storage_id) else {
            return Ok(Vec::new());
        };
        let removed: Vec<PermissionKey> = roots
            .iter()
            .flat_map(|root| bucket.trie.remove_tree(root))
            .map(|row| row.key())
            .collect();
        debug!(removed = removed.len(), "deleted permission trees");
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn move_tree(
        &self,
        storage_id: StorageId,
        source: &PathRef,
        destination: &PathRef,
    ) -> StorageResult<usize> {
        validate_storage_id(storage_id)?;
        validate_path(&source.path)?;
        validate_path(&destination.path)?;
        let Some(mut bucket) = self.storages.get_mut(&storage_id) else {
            return Ok(0);
        };
        if bucket.trie.is_occupied(destination) {
            return Err(StorageError::DestinationOccupied {
                storage_id,
                path: destination.path.clone(),
            });
        }
        let moved = bucket.trie.move_tree(source, destination);
        debug!(moved, "moved permission tree");
        Ok(moved)
    }

    async fn storages_with_grants(&self, sids: &[Sid]) -> StorageResult<Vec<StorageRef>> {
        if sids.is_empty() {
            return Ok(Vec::new());
        }
        let mut storages: Vec<StorageRef> = self
            .storages
            .iter()
            .filter(|bucket| bucket.trie.has_rows_for(sids))
            .map(|bucket| StorageRef::new(*bucket.key(), bucket.kind))
            .collect();
        storages.sort();
        Ok(storages)
    }

    #[instrument(skip(self, prolongations), fields(count = prolongations.len()))]
    async fn upsert_prolongations(
        &self,
        storage_id: StorageId,
        prolongations: Vec<StoredProlongation>,
    ) -> StorageResult<Vec<StoredProlongation>> {
        validate_storage_id(storage_id)?;
        for prolongation in &prolongations {
            validate_prolongation(storage_id, prolongation)?;
        }
        let prolongations = dedup_prolongations(prolongations);
        let mut by_path = self.prolongations.entry(storage_id).or_default();
        for prolongation in &prolongations {
            by_path.insert(prolongation.path.clone(), prolongation.clone());
        }
        Ok(prolongations)
    }

    async fn find_prolongations(
        &self,
        storage_id: StorageId,
        paths: &[String],
    ) -> StorageResult<Vec<StoredProlongation>> {
        validate_storage_id(storage_id)?;
        let Some(by_path) = self.prolongations.get(&storage_id) else {
            return Ok(Vec::new());
        };
        Ok(paths
            .iter()
            .filter_map(|path| by_path.get(path).cloned())
            .collect())
    }

    async fn list_prolongations(
        &self,
        storage_id: StorageId,
    ) -> StorageResult<Vec<StoredProlongation>> {
        validate_storage_id(storage_id)?;
        let mut all: Vec<StoredProlongation> = self
            .prolongations
            .get(&storage_id)
            .map(|by_path| by_path.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(all)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            latency: std::time::Duration::ZERO,
            pool_stats: None,
            message: Some("in-memory storage".to_string()),
        })
    }
}
