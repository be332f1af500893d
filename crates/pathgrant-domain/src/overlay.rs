//! Storage listing overlay.
//!
//! Combines the base ACL mask of each listed storage with the read-allowed
//! storage index, then applies the mount-disabled clamp.

use std::collections::BTreeSet;

use crate::model::{Mask, SecuredStorage, StorageRef};

/// Applies the path-level overlay to a listing.
///
/// A storage in `read_allowed` gains READ. The mount-disabled clamp runs on
/// the combined mask. Storages left without READ are dropped.
pub fn apply_overlay(
    storages: Vec<SecuredStorage>,
    read_allowed: &BTreeSet<StorageRef>,
) -> Vec<SecuredStorage> {
    storages
        .into_iter()
        .map(|mut secured| {
            if read_allowed.contains(&secured.storage) {
                secured.mask |= Mask::READ;
            }
            clamp_mount_disabled(secured)
        })
        .filter(|secured| secured.mask.contains(Mask::READ))
        .collect()
}

/// Limits a mount-disabled filesystem storage to at most READ.
pub fn clamp_mount_disabled(mut secured: SecuredStorage) -> SecuredStorage {
    if secured.mount_disabled && secured.storage.kind.is_filesystem() {
        secured.mask = secured.mask & Mask::READ;
    }
    secured
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StorageKind;

    fn secured(id: i64, kind: StorageKind, mask: Mask) -> SecuredStorage {
        SecuredStorage::new(StorageRef::new(id, kind), mask)
    }

    #[test]
    fn test_read_allowed_storage_is_surfaced() {
        let hidden = secured(1, StorageKind::S3, Mask::NONE);
        let allowed = BTreeSet::from([hidden.storage]);

        let listed = apply_overlay(vec![hidden], &allowed);

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].mask, Mask::READ);
    }

    #[test]
    fn test_storage_without_read_is_dropped() {
        let write_only = secured(1, StorageKind::S3, Mask::WRITE);
        let readable = secured(2, StorageKind::Azure, Mask::READ | Mask::WRITE);

        let listed = apply_overlay(vec![write_only, readable], &BTreeSet::new());

        assert_eq!(listed, vec![readable]);
    }

    #[test]
    fn test_kind_must_match_for_overlay() {
        let storage = secured(1, StorageKind::S3, Mask::NONE);
        let allowed = BTreeSet::from([StorageRef::new(1, StorageKind::Gcs)]);

        assert!(apply_overlay(vec![storage], &allowed).is_empty());
    }

    #[test]
    fn test_mount_disabled_nfs_is_clamped_after_overlay() {
        let nfs = secured(1, StorageKind::Nfs, Mask::WRITE | Mask::EXECUTE).with_mount_disabled(true);
        let allowed = BTreeSet::from([nfs.storage]);

        let listed = apply_overlay(vec![nfs], &allowed);

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].mask, Mask::READ);
    }

    #[test]
    fn test_clamp_leaves_object_storage_and_mounted_nfs_alone() {
        let full = Mask::READ | Mask::WRITE;
        let s3 = secured(1, StorageKind::S3, full).with_mount_disabled(true);
        let mounted = secured(2, StorageKind::Nfs, full);

        assert_eq!(clamp_mount_disabled(s3).mask, full);
        assert_eq!(clamp_mount_disabled(mounted).mask, full);
    }
}
