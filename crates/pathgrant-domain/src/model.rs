//! Domain-facing types.
//!
//! Row and key types are shared with the storage layer; this module adds the
//! request-side shapes the engine accepts before normalization.

pub use pathgrant_storage::{
    Mask, PathRef, PathType, PermissionKey, Sid, SidType, StorageId, StorageKind, StorageRef,
    StoredPermission, StoredProlongation, PATH_SEPARATOR,
};
use serde::{Deserialize, Serialize};

/// A permission to write, as supplied by a caller. The path is normalized
/// before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub path: String,
    pub path_type: PathType,
    pub sid: Sid,
    pub mask: Mask,
}

impl GrantRequest {
    pub fn new(path: impl Into<String>, path_type: PathType, sid: Sid, mask: Mask) -> Self {
        Self {
            path: path.into(),
            path_type,
            sid,
            mask,
        }
    }
}

/// A storage as seen by the listing path, carrying its current mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuredStorage {
    pub storage: StorageRef,
    pub mask: Mask,
    /// Filesystem mount is disabled for this storage.
    pub mount_disabled: bool,
}

impl SecuredStorage {
    pub fn new(storage: StorageRef, mask: Mask) -> Self {
        Self {
            storage,
            mask,
            mount_disabled: false,
        }
    }

    pub fn with_mount_disabled(mut self, mount_disabled: bool) -> Self {
        self.mount_disabled = mount_disabled;
        self
    }
}
