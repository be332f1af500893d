//! Read-allowed storage index.
//!
//! Answers "which storages hold any path-level grant for this sid set". The
//! listing overlay uses the answer to surface storages the base ACL hides.

mod cache;

pub use cache::{register_index_cache_metrics, IndexCache, IndexCacheConfig, SidSetKey};

use std::collections::BTreeSet;
use std::sync::Arc;

use pathgrant_storage::PermissionStore;
use tracing::{debug, instrument};

use crate::error::DomainResult;
use crate::model::{Sid, StorageId, StorageRef};

/// Derives read-allowed storages from the permission store.
pub struct ReadAllowedStorageIndex<S: ?Sized> {
    store: Arc<S>,
    /// `None` when caching is disabled.
    cache: Option<Arc<IndexCache>>,
}

impl<S: PermissionStore + ?Sized> ReadAllowedStorageIndex<S> {
    pub fn new(store: Arc<S>, config: IndexCacheConfig) -> Self {
        let cache = config
            .enabled
            .then(|| Arc::new(IndexCache::new(config)));
        Self { store, cache }
    }

    /// Cache handle, if caching is enabled.
    pub fn cache(&self) -> Option<&Arc<IndexCache>> {
        self.cache.as_ref()
    }

    /// Every storage holding at least one row for any of `sids`.
    #[instrument(skip(self, sids), fields(sids = sids.len()))]
    pub async fn load_read_allowed_storages(
        &self,
        sids: &[Sid],
    ) -> DomainResult<BTreeSet<StorageRef>> {
        let key = SidSetKey::new(sids);
        if key.is_empty() {
            return Ok(BTreeSet::new());
        }

        let Some(cache) = &self.cache else {
            return self.query(&key).await;
        };

        if let Some(hit) = cache.get(&key).await {
            return Ok(hit.as_ref().clone());
        }

        let generation = cache.generation();
        let storages = self.query(&key).await?;
        let kept = cache
            .insert_if_current(key, Arc::new(storages.clone()), generation)
            .await;
        if !kept {
            debug!("discarded index result computed before a concurrent write");
        }
        Ok(storages)
    }

    /// Invalidates cached results a write to `storage_id` touching `sids` may
    /// have changed. Every write path awaits this before returning.
    pub async fn invalidate_for_write(&self, storage_id: StorageId, sids: &[Sid]) {
        if let Some(cache) = &self.cache {
            cache.invalidate_for_write(storage_id, sids).await;
        }
    }

    async fn query(&self, key: &SidSetKey) -> DomainResult<BTreeSet<StorageRef>> {
        let storages = self.store.storages_with_grants(key.sids()).await?;
        Ok(storages.into_iter().collect())
    }
}
