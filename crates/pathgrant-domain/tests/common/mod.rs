//! Shared wiring for domain integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use pathgrant_domain::model::{StorageKind, StorageRef};
use pathgrant_domain::{
    BatchConfig, BatchOperationProcessor, IndexCacheConfig, PathMigrator, PermissionResolver,
    ReadAllowedStorageIndex, StorageCatalog, StoreCatalog, WriteGate,
};
use pathgrant_storage::{MemoryPermissionStore, PermissionStore};

pub const STORAGE: StorageRef = StorageRef {
    id: 42,
    kind: StorageKind::S3,
};

/// All domain components over one in-memory store.
pub struct Engine {
    pub store: Arc<MemoryPermissionStore>,
    pub resolver: PermissionResolver<MemoryPermissionStore>,
    pub batch: BatchOperationProcessor<MemoryPermissionStore>,
    pub migrator: PathMigrator<MemoryPermissionStore>,
    pub index: Arc<ReadAllowedStorageIndex<MemoryPermissionStore>>,
}

pub async fn engine(cache_enabled: bool, storages: &[StorageRef]) -> Engine {
    let store = MemoryPermissionStore::new_shared();
    for storage in storages {
        store.register_storage(storage).await.unwrap();
    }
    let catalog: Arc<dyn StorageCatalog> = Arc::new(StoreCatalog::new(Arc::clone(&store)));
    let gate = Arc::new(WriteGate::new());
    let index = Arc::new(ReadAllowedStorageIndex::new(
        Arc::clone(&store),
        IndexCacheConfig::default().with_enabled(cache_enabled),
    ));

    Engine {
        resolver: PermissionResolver::new(Arc::clone(&store)),
        batch: BatchOperationProcessor::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&gate),
            Arc::clone(&index),
            BatchConfig::default(),
        ),
        migrator: PathMigrator::new(
            Arc::clone(&store),
            catalog,
            gate,
            Arc::clone(&index),
            BatchConfig::default(),
        ),
        index,
        store,
    }
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}
