//! Backend selection and component wiring.

use std::sync::Arc;

use pathgrant_domain::{
    BatchConfig, BatchOperationProcessor, IndexCacheConfig, PathMigrator, PermissionResolver,
    ReadAllowedStorageIndex, StorageCatalog, StoreCatalog, WriteGate,
};
use pathgrant_storage::{
    HealthStatus, MemoryPermissionStore, PermissionStore, PostgresPermissionStore, StorageError,
    StorageRef, StorageResult,
};
use tracing::info;

use crate::config::{ConfigLoadError, EngineConfig};

/// Store type the engine is wired against.
pub type DynStore = dyn PermissionStore;

/// Errors raised while building an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error("failed to initialize storage: {0}")]
    Storage(#[from] StorageError),
}

/// All engine components over one shared store.
pub struct PermissionEngine {
    store: Arc<DynStore>,
    catalog: Arc<dyn StorageCatalog>,
    resolver: PermissionResolver<DynStore>,
    batch: BatchOperationProcessor<DynStore>,
    migrator: PathMigrator<DynStore>,
    index: Arc<ReadAllowedStorageIndex<DynStore>>,
}

impl PermissionEngine {
    /// Wires components over `store`, using the store's own storage roots as
    /// the catalog.
    pub fn new(store: Arc<DynStore>, batch: BatchConfig, cache: IndexCacheConfig) -> Self {
        let catalog: Arc<dyn StorageCatalog> = Arc::new(StoreCatalog::new(Arc::clone(&store)));
        Self::with_catalog(store, catalog, batch, cache)
    }

    /// Wires components over `store` with an external storage catalog.
    pub fn with_catalog(
        store: Arc<DynStore>,
        catalog: Arc<dyn StorageCatalog>,
        batch: BatchConfig,
        cache: IndexCacheConfig,
    ) -> Self {
        let gate = Arc::new(WriteGate::new());
        let index = Arc::new(ReadAllowedStorageIndex::new(Arc::clone(&store), cache));

        Self {
            resolver: PermissionResolver::new(Arc::clone(&store)),
            batch: BatchOperationProcessor::new(
                Arc::clone(&store),
                Arc::clone(&catalog),
                Arc::clone(&gate),
                Arc::clone(&index),
                batch.clone(),
            ),
            migrator: PathMigrator::new(
                Arc::clone(&store),
                Arc::clone(&catalog),
                gate,
                Arc::clone(&index),
                batch,
            ),
            index,
            catalog,
            store,
        }
    }

    /// In-memory engine with default settings.
    pub fn in_memory() -> Self {
        let store: Arc<DynStore> = MemoryPermissionStore::new_shared();
        Self::new(store, BatchConfig::default(), IndexCacheConfig::default())
    }

    /// Builds the configured backend and wires every component.
    ///
    /// For PostgreSQL the schema is created if missing.
    pub async fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let store: Arc<DynStore> = match config.storage.backend.as_str() {
            "postgres" => {
                let store =
                    PostgresPermissionStore::from_config(&config.storage.postgres_config()).await?;
                store.run_migrations().await?;
                Arc::new(store)
            }
            _ => MemoryPermissionStore::new_shared(),
        };
        info!(
            backend = %config.storage.backend,
            index_cache = config.index_cache.enabled,
            max_batch_size = config.limits.max_batch_size,
            "permission engine initialized"
        );

        Ok(Self::new(
            store,
            config.limits.batch_config(),
            config.index_cache.cache_config(),
        ))
    }

    pub fn store(&self) -> &Arc<DynStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn StorageCatalog> {
        &self.catalog
    }

    pub fn resolver(&self) -> &PermissionResolver<DynStore> {
        &self.resolver
    }

    pub fn batch(&self) -> &BatchOperationProcessor<DynStore> {
        &self.batch
    }

    pub fn migrator(&self) -> &PathMigrator<DynStore> {
        &self.migrator
    }

    pub fn index(&self) -> &Arc<ReadAllowedStorageIndex<DynStore>> {
        &self.index
    }

    /// Records a storage root so later requests naming it are accepted.
    pub async fn register_storage(&self, storage: StorageRef) -> StorageResult<()> {
        self.store.register_storage(&storage).await
    }

    pub async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.store.health_check().await
    }
}
