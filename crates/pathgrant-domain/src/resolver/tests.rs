use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pathgrant_storage::{
    HealthStatus, MemoryPermissionStore, PermissionKey, StorageKind, StorageRef, StorageResult,
    StoredProlongation,
};

use super::*;
use crate::model::PathType;

const STORAGE: StorageRef = StorageRef {
    id: 42,
    kind: StorageKind::S3,
};

fn alice() -> Sid {
    Sid::user("alice")
}

fn lab() -> Sid {
    Sid::group("lab")
}

async fn store_with(rows: Vec<StoredPermission>) -> Arc<MemoryPermissionStore> {
    let store = MemoryPermissionStore::new_shared();
    store.upsert_permissions(&STORAGE, rows).await.unwrap();
    store
}

fn row(path: &str, path_type: PathType, sid: Sid, mask: Mask) -> StoredPermission {
    StoredPermission::new(path, path_type, sid, mask)
}

// ============================================================
// Section 1: Inheritance and specificity
// ============================================================

#[tokio::test]
async fn test_folder_grant_is_inherited_by_descendants() {
    let store = store_with(vec![row("proj", PathType::Folder, alice(), Mask::READ)]).await;
    let resolver = PermissionResolver::new(store);

    let mask = resolver
        .resolve(42, &PathRef::file("/proj/data.csv"), &[alice()])
        .await
        .unwrap();
    assert_eq!(mask, Mask::READ);

    let deep = resolver
        .resolve(42, &PathRef::folder("proj/a/b/c"), &[alice()])
        .await
        .unwrap();
    assert_eq!(deep, Mask::READ);
}

#[tokio::test]
async fn test_exact_file_row_wins_over_folder_ancestor() {
    let store = store_with(vec![
        row("proj", PathType::Folder, alice(), Mask::READ | Mask::WRITE),
        row("proj/secret.txt", PathType::File, alice(), Mask::EXECUTE),
    ])
    .await;
    let resolver = PermissionResolver::new(store);

    let mask = resolver
        .resolve(42, &PathRef::file("proj/secret.txt"), &[alice()])
        .await
        .unwrap();
    assert_eq!(mask, Mask::EXECUTE);
}

#[tokio::test]
async fn test_nearest_folder_wins_for_same_sid() {
    let store = store_with(vec![
        row("proj", PathType::Folder, alice(), Mask::READ | Mask::WRITE),
        row("proj/sub", PathType::Folder, alice(), Mask::READ),
    ])
    .await;
    let resolver = PermissionResolver::new(store);

    let mask = resolver
        .resolve(42, &PathRef::file("proj/sub/x.txt"), &[alice()])
        .await
        .unwrap();
    assert_eq!(mask, Mask::READ);
}

#[tokio::test]
async fn test_file_row_does_not_apply_to_folder_query() {
    let store = store_with(vec![row("proj", PathType::File, alice(), Mask::READ)]).await;
    let resolver = PermissionResolver::new(store);

    let as_folder = resolver
        .resolve(42, &PathRef::folder("proj"), &[alice()])
        .await
        .unwrap();
    let child = resolver
        .resolve(42, &PathRef::file("proj/a"), &[alice()])
        .await
        .unwrap();
    assert_eq!(as_folder, Mask::NONE);
    assert_eq!(child, Mask::NONE);
}

#[tokio::test]
async fn test_sibling_with_shared_prefix_does_not_inherit() {
    let store = store_with(vec![row("proj", PathType::Folder, alice(), Mask::READ)]).await;
    let resolver = PermissionResolver::new(store);

    let mask = resolver
        .resolve(42, &PathRef::file("project2/a.txt"), &[alice()])
        .await
        .unwrap();
    assert_eq!(mask, Mask::NONE);
}

// ============================================================
// Section 2: Combination across sids
// ============================================================

#[tokio::test]
async fn test_masks_of_different_sids_are_combined() {
    let store = store_with(vec![
        row("proj", PathType::Folder, alice(), Mask::READ),
        row("proj/data.csv", PathType::File, lab(), Mask::WRITE),
    ])
    .await;
    let resolver = PermissionResolver::new(store);

    let mask = resolver
        .resolve(42, &PathRef::file("proj/data.csv"), &[alice(), lab()])
        .await
        .unwrap();
    assert_eq!(mask, Mask::READ | Mask::WRITE);
}

#[tokio::test]
async fn test_unknown_storage_and_no_rows_yield_zero() {
    let store = store_with(vec![row("proj", PathType::Folder, alice(), Mask::READ)]).await;
    let resolver = PermissionResolver::new(store);

    let other_storage = resolver
        .resolve(7, &PathRef::file("proj/a"), &[alice()])
        .await
        .unwrap();
    let other_sid = resolver
        .resolve(42, &PathRef::file("proj/a"), &[Sid::user("bob")])
        .await
        .unwrap();
    assert_eq!(other_storage, Mask::NONE);
    assert_eq!(other_sid, Mask::NONE);
}

#[tokio::test]
async fn test_invalid_path_is_rejected() {
    let store = MemoryPermissionStore::new_shared();
    let resolver = PermissionResolver::new(store);

    let result = resolver.resolve(42, &PathRef::file("//"), &[alice()]).await;
    assert!(matches!(result, Err(crate::error::DomainError::InvalidPath { .. })));
}

// ============================================================
// Section 3: Batch resolution
// ============================================================

/// Wraps the memory store and counts `find_applicable` calls.
struct CountingStore {
    inner: MemoryPermissionStore,
    lookups: AtomicUsize,
}

#[async_trait]
impl PermissionStore for CountingStore {
    async fn register_storage(&self, storage: &StorageRef) -> StorageResult<()> {
        self.inner.register_storage(storage).await
    }

    async fn storage_kind(&self, storage_id: StorageId) -> StorageResult<Option<StorageKind>> {
        self.inner.storage_kind(storage_id).await
    }

    async fn upsert_permissions(
        &self,
        storage: &StorageRef,
        entries: Vec<StoredPermission>,
    ) -> StorageResult<Vec<StoredPermission>> {
        self.inner.upsert_permissions(storage, entries).await
    }

    async fn delete_permissions(
        &self,
        storage_id: StorageId,
        keys: Vec<PermissionKey>,
    ) -> StorageResult<Vec<PermissionKey>> {
        self.inner.delete_permissions(storage_id, keys).await
    }

    async fn load_permissions(
        &self,
        storage_id: StorageId,
        paths: &[PathRef],
    ) -> StorageResult<Vec<StoredPermission>> {
        self.inner.load_permissions(storage_id, paths).await
    }

    async fn find_applicable(
        &self,
        storage_id: StorageId,
        candidates: &[PathRef],
        sids: &[Sid],
    ) -> StorageResult<Vec<StoredPermission>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_applicable(storage_id, candidates, sids).await
    }

    async fn delete_trees(
        &self,
        storage_id: StorageId,
        roots: &[PathRef],
    ) -> StorageResult<Vec<PermissionKey>> {
        self.inner.delete_trees(storage_id, roots).await
    }

    async fn move_tree(
        &self,
        storage_id: StorageId,
        source: &PathRef,
        destination: &PathRef,
    ) -> StorageResult<usize> {
        self.inner.move_tree(storage_id, source, destination).await
    }

    async fn storages_with_grants(&self, sids: &[Sid]) -> StorageResult<Vec<StorageRef>> {
        self.inner.storages_with_grants(sids).await
    }

    async fn upsert_prolongations(
        &self,
        storage_id: StorageId,
        prolongations: Vec<StoredProlongation>,
    ) -> StorageResult<Vec<StoredProlongation>> {
        self.inner.upsert_prolongations(storage_id, prolongations).await
    }

    async fn find_prolongations(
        &self,
        storage_id: StorageId,
        paths: &[String],
    ) -> StorageResult<Vec<StoredProlongation>> {
        self.inner.find_prolongations(storage_id, paths).await
    }

    async fn list_prolongations(
        &self,
        storage_id: StorageId,
    ) -> StorageResult<Vec<StoredProlongation>> {
        self.inner.list_prolongations(storage_id).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }
}

async fn counting_store() -> Arc<CountingStore> {
    let store = Arc::new(CountingStore {
        inner: MemoryPermissionStore::new(),
        lookups: AtomicUsize::new(0),
    });
    store
        .upsert_permissions(
            &STORAGE,
            vec![
                row("proj", PathType::Folder, alice(), Mask::READ),
                row("proj/b.txt", PathType::File, lab(), Mask::WRITE),
                row("docs", PathType::Folder, lab(), Mask::EXECUTE),
            ],
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_resolve_batch_uses_single_store_query() {
    let store = counting_store().await;
    let resolver = PermissionResolver::new(Arc::clone(&store));

    let masks = resolver
        .resolve_batch(
            42,
            &[
                PathRef::file("proj/a.txt"),
                PathRef::file("proj/b.txt"),
                PathRef::folder("docs/x"),
                PathRef::file("other.txt"),
            ],
            &[alice(), lab()],
        )
        .await
        .unwrap();

    assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(masks[&PathRef::file("proj/a.txt")], Mask::READ);
    assert_eq!(masks[&PathRef::file("proj/b.txt")], Mask::READ | Mask::WRITE);
    assert_eq!(masks[&PathRef::folder("docs/x")], Mask::EXECUTE);
    assert_eq!(masks[&PathRef::file("other.txt")], Mask::NONE);
}

#[tokio::test]
async fn test_resolve_batch_answers_duplicates_once() {
    let store = counting_store().await;
    let resolver = PermissionResolver::new(store);

    let masks = resolver
        .resolve_batch(
            42,
            &[PathRef::file("/proj/a.txt"), PathRef::file("proj//a.txt/")],
            &[alice()],
        )
        .await
        .unwrap();

    assert_eq!(masks.len(), 1);
    assert_eq!(masks[&PathRef::file("proj/a.txt")], Mask::READ);
}

#[tokio::test]
async fn test_empty_sid_set_skips_store() {
    let store = counting_store().await;
    let resolver = PermissionResolver::new(Arc::clone(&store));

    let masks = resolver
        .resolve_batch(42, &[PathRef::file("proj/a.txt")], &[])
        .await
        .unwrap();

    assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    assert_eq!(masks[&PathRef::file("proj/a.txt")], Mask::NONE);
}

#[tokio::test]
async fn test_resolve_batch_matches_individual_resolves() {
    let store = counting_store().await;
    let resolver = PermissionResolver::new(store);
    let targets = [
        PathRef::file("proj/a.txt"),
        PathRef::file("proj/b.txt"),
        PathRef::folder("docs"),
        PathRef::file("docs"),
    ];
    let sids = [alice(), lab()];

    let batch = resolver.resolve_batch(42, &targets, &sids).await.unwrap();
    for target in &targets {
        let single = resolver.resolve(42, target, &sids).await.unwrap();
        assert_eq!(batch[target], single, "mismatch for {target:?}");
    }
}
