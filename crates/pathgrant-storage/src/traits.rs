//! PermissionStore trait definition.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{HealthStatus, StorageError, StorageResult};
use crate::model::{
    PathRef, PermissionKey, Sid, StorageId, StorageKind, StorageRef, StoredPermission,
    StoredProlongation, PATH_SEPARATOR,
};

/// Maximum length of a stored path in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Maximum length of a sid name in bytes.
pub const MAX_SID_NAME_LENGTH: usize = 255;

/// Validates a storage identifier.
pub fn validate_storage_id(storage_id: StorageId) -> StorageResult<()> {
    if storage_id <= 0 {
        return Err(StorageError::InvalidInput {
            message: format!("storage id must be positive, got {storage_id}"),
        });
    }
    Ok(())
}

/// Validates that a path is in stored form: non-empty, no leading or trailing
/// separator and no empty segments.
pub fn validate_path(path: &str) -> StorageResult<()> {
    if path.trim().is_empty() {
        return Err(StorageError::InvalidInput {
            message: "path cannot be empty".to_string(),
        });
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!("path exceeds maximum length of {MAX_PATH_LENGTH} bytes"),
        });
    }
    if path.split(PATH_SEPARATOR).any(str::is_empty) {
        return Err(StorageError::InvalidInput {
            message: format!("path is not normalized: '{path}'"),
        });
    }
    Ok(())
}

/// Validates a sid name.
pub fn validate_sid(sid: &Sid) -> StorageResult<()> {
    if sid.name.trim().is_empty() {
        return Err(StorageError::InvalidInput {
            message: "sid name cannot be empty".to_string(),
        });
    }
    if sid.name.len() > MAX_SID_NAME_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!("sid name exceeds maximum length of {MAX_SID_NAME_LENGTH} bytes"),
        });
    }
    Ok(())
}

/// Validates a key used for lookups and deletes.
pub fn validate_key(key: &PermissionKey) -> StorageResult<()> {
    validate_path(&key.path)?;
    validate_sid(&key.sid)
}

/// Validates a row before it is written. Zero masks are never persisted.
pub fn validate_permission(permission: &StoredPermission) -> StorageResult<()> {
    validate_path(&permission.path)?;
    validate_sid(&permission.sid)?;
    if permission.mask.is_empty() {
        return Err(StorageError::InvalidInput {
            message: format!(
                "mask cannot be zero for {} {} ({})",
                permission.path_type, permission.path, permission.sid
            ),
        });
    }
    Ok(())
}

/// Collapses rows sharing a key so that the last occurrence wins, keeping the
/// first-seen order of keys.
pub fn dedup_last_wins(entries: Vec<StoredPermission>) -> Vec<StoredPermission> {
    let mut positions: HashMap<PermissionKey, usize> = HashMap::with_capacity(entries.len());
    let mut unique: Vec<StoredPermission> = Vec::with_capacity(entries.len());
    for entry in entries {
        match positions.get(&entry.key()) {
            Some(&idx) => unique[idx] = entry,
            None => {
                positions.insert(entry.key(), unique.len());
                unique.push(entry);
            }
        }
    }
    unique
}

/// Validates a prolongation destined for `storage_id`.
pub fn validate_prolongation(
    storage_id: StorageId,
    prolongation: &StoredProlongation,
) -> StorageResult<()> {
    if prolongation.storage_id != storage_id {
        return Err(StorageError::InvalidInput {
            message: format!(
                "prolongation for storage {} in a batch for storage {storage_id}",
                prolongation.storage_id
            ),
        });
    }
    validate_path(&prolongation.path)?;
    if prolongation.user_id.trim().is_empty() {
        return Err(StorageError::InvalidInput {
            message: "prolongation user id cannot be empty".to_string(),
        });
    }
    if prolongation.days == 0 {
        return Err(StorageError::InvalidInput {
            message: format!("prolongation days must be positive for '{}'", prolongation.path),
        });
    }
    Ok(())
}

/// Collapses prolongations sharing a path so that the last one wins.
pub fn dedup_prolongations(prolongations: Vec<StoredProlongation>) -> Vec<StoredProlongation> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(prolongations.len());
    let mut unique: Vec<StoredProlongation> = Vec::with_capacity(prolongations.len());
    for prolongation in prolongations {
        match positions.get(&prolongation.path) {
            Some(&idx) => unique[idx] = prolongation,
            None => {
                positions.insert(prolongation.path.clone(), unique.len());
                unique.push(prolongation);
            }
        }
    }
    unique
}

/// Abstract storage interface for path-level permission rows.
///
/// Implementations must be thread-safe (Send + Sync) and support async
/// operations. Every mutating call is atomic with respect to readers of the
/// same storage: a reader observes either all of its effects or none.
///
/// Paths passed to a store are already normalized by the caller (see
/// [`validate_path`]).
#[async_trait]
pub trait PermissionStore: Send + Sync + 'static {
    // Storage roots

    /// Records a storage root and its kind.
    ///
    /// Registering a known storage with the same kind is a no-op; a different
    /// kind fails with `StorageKindMismatch`.
    async fn register_storage(&self, storage: &StorageRef) -> StorageResult<()>;

    /// Returns the kind of a registered storage, or `None` if unknown.
    async fn storage_kind(&self, storage_id: StorageId) -> StorageResult<Option<StorageKind>>;

    // Permission rows

    /// Inserts or overwrites rows in one transaction.
    ///
    /// The storage is registered if unknown. A key collision overwrites
    /// `mask` and `created`. Returns the rows as stored.
    async fn upsert_permissions(
        &self,
        storage: &StorageRef,
        entries: Vec<StoredPermission>,
    ) -> StorageResult<Vec<StoredPermission>>;

    /// Inserts or overwrites a single row.
    async fn upsert_permission(
        &self,
        storage: &StorageRef,
        entry: StoredPermission,
    ) -> StorageResult<StoredPermission> {
        let mut stored = self.upsert_permissions(storage, vec![entry]).await?;
        stored.pop().ok_or_else(|| StorageError::InternalError {
            message: "upsert returned no row".to_string(),
        })
    }

    /// Removes exact rows. Missing keys are skipped; returns the keys removed.
    async fn delete_permissions(
        &self,
        storage_id: StorageId,
        keys: Vec<PermissionKey>,
    ) -> StorageResult<Vec<PermissionKey>>;

    /// Returns rows stored at exactly the given `(path, type)` pairs, for all sids.
    async fn load_permissions(
        &self,
        storage_id: StorageId,
        paths: &[PathRef],
    ) -> StorageResult<Vec<StoredPermission>>;

    /// Returns rows stored at any of `candidates` for any of `sids`, in a
    /// single round trip.
    async fn find_applicable(
        &self,
        storage_id: StorageId,
        candidates: &[PathRef],
        sids: &[Sid],
    ) -> StorageResult<Vec<StoredPermission>>;

    /// Removes the rows governed by every root in `roots` in one transaction.
    ///
    /// For a FOLDER root this is every row at the root path and every row
    /// beneath it (segment-wise). For a FILE root only FILE rows at the exact
    /// path are removed. Overlapping roots are fine; each removed key is
    /// reported once.
    async fn delete_trees(
        &self,
        storage_id: StorageId,
        roots: &[PathRef],
    ) -> StorageResult<Vec<PermissionKey>>;

    /// Removes the rows governed by `root`.
    async fn delete_tree(
        &self,
        storage_id: StorageId,
        root: &PathRef,
    ) -> StorageResult<Vec<PermissionKey>> {
        self.delete_trees(storage_id, std::slice::from_ref(root))
            .await
    }

    /// Rewrites the rows governed by `source` so they live under `destination`.
    ///
    /// Fails with `DestinationOccupied` and changes nothing if any row already
    /// exists at or under the destination. `created` is preserved. Returns the
    /// number of rows migrated.
    async fn move_tree(
        &self,
        storage_id: StorageId,
        source: &PathRef,
        destination: &PathRef,
    ) -> StorageResult<usize>;

    /// Returns every storage holding at least one row for any of `sids`.
    async fn storages_with_grants(&self, sids: &[Sid]) -> StorageResult<Vec<StorageRef>>;

    // Prolongations

    /// Inserts or overwrites prolongations of one storage in one transaction.
    ///
    /// Every record must carry `storage_id`. A path repeated in the batch
    /// keeps its last record.
    async fn upsert_prolongations(
        &self,
        storage_id: StorageId,
        prolongations: Vec<StoredProlongation>,
    ) -> StorageResult<Vec<StoredProlongation>>;

    /// Inserts or overwrites the prolongation recorded at `(storage_id, path)`.
    async fn upsert_prolongation(
        &self,
        prolongation: StoredProlongation,
    ) -> StorageResult<StoredProlongation> {
        let mut stored = self
            .upsert_prolongations(prolongation.storage_id, vec![prolongation])
            .await?;
        stored.pop().ok_or_else(|| StorageError::InternalError {
            message: "upsert returned no prolongation".to_string(),
        })
    }

    /// Returns prolongations recorded at exactly the given paths.
    async fn find_prolongations(
        &self,
        storage_id: StorageId,
        paths: &[String],
    ) -> StorageResult<Vec<StoredProlongation>>;

    /// Returns the most specific prolongation recorded at `path` or at one of
    /// its ancestor folders.
    async fn find_prolongation(
        &self,
        storage_id: StorageId,
        path: &str,
    ) -> StorageResult<Option<StoredProlongation>> {
        let chain: Vec<String> =
            std::iter::successors(Some(path), |p| p.rsplit_once(PATH_SEPARATOR).map(|(a, _)| a))
                .map(str::to_string)
                .collect();
        let found = self.find_prolongations(storage_id, &chain).await?;
        Ok(found.into_iter().max_by_key(|p| p.path.len()))
    }

    /// Returns all prolongations of a storage.
    async fn list_prolongations(
        &self,
        storage_id: StorageId,
    ) -> StorageResult<Vec<StoredProlongation>>;

    // Health

    /// Verifies the backend is reachable.
    async fn health_check(&self) -> StorageResult<HealthStatus>;
}
