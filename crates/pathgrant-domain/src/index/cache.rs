//! Read-allowed storage cache with synchronous invalidation.
//!
//! Results are keyed by the normalized sid set that was queried. Two
//! secondary indices make invalidation O(affected keys) instead of a scan:
//! - `by_sid`: sid -> keys whose sid set contains it
//! - `by_storage`: storage id -> keys whose cached result contains it
//!
//! A write that adds a storage to some sid's result is caught through
//! `by_sid`; a write that removes one is caught through either index.
//!
//! # Cache Safety
//!
//! Caching is **disabled** by default. A stale positive entry would surface
//! a storage after its last grant was revoked, so every write path must await
//! [`IndexCache::invalidate_for_write`] before it returns.
//!
//! A reader that computed its result before a concurrent write must not
//! re-populate the cache with it. Readers capture [`IndexCache::generation`]
//! before querying the store and insert through
//! [`IndexCache::insert_if_current`], which drops the entry again if a write
//! finished in between.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;

use crate::model::{Sid, StorageId, StorageRef};

/// Configuration for the read-allowed storage cache.
#[derive(Debug, Clone)]
pub struct IndexCacheConfig {
    /// Whether caching is enabled. Defaults to `false`.
    pub enabled: bool,
    /// Maximum number of cached sid sets.
    pub max_capacity: u64,
    /// Time-to-live of a cached entry.
    pub ttl: Duration,
}

impl Default for IndexCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: 10_000,
            ttl: Duration::from_secs(30),
        }
    }
}

impl IndexCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Cache key: a sorted, de-duplicated sid set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SidSetKey(Vec<Sid>);

impl SidSetKey {
    pub fn new(sids: &[Sid]) -> Self {
        let unique: BTreeSet<&Sid> = sids.iter().collect();
        Self(unique.into_iter().cloned().collect())
    }

    pub fn sids(&self) -> &[Sid] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type CachedStorages = Arc<BTreeSet<StorageRef>>;

/// Cache of read-allowed storage sets.
pub struct IndexCache {
    cache: Cache<SidSetKey, CachedStorages>,
    config: IndexCacheConfig,
    by_sid: DashMap<Sid, HashSet<SidSetKey>>,
    by_storage: DashMap<StorageId, HashSet<SidSetKey>>,
    /// Bumped by every invalidating write.
    generation: AtomicU64,
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .field("sid_index_size", &self.by_sid.len())
            .field("storage_index_size", &self.by_storage.len())
            .finish()
    }
}

impl IndexCache {
    pub fn new(config: IndexCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .build();

        Self {
            cache,
            config,
            by_sid: DashMap::new(),
            by_storage: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &IndexCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current write generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// # Metrics
    ///
    /// - `pathgrant_index_cache_hits_total`
    /// - `pathgrant_index_cache_misses_total`
    pub async fn get(&self, key: &SidSetKey) -> Option<CachedStorages> {
        let result = self.cache.get(key).await;
        if result.is_some() {
            metrics::counter!("pathgrant_index_cache_hits_total").increment(1);
        } else {
            metrics::counter!("pathgrant_index_cache_misses_total").increment(1);
        }
        result
    }

    /// Caches `storages` for `key` unless a write finished after `generation`
    /// was read. Returns true if the entry was kept.
    pub async fn insert_if_current(
        &self,
        key: SidSetKey,
        storages: CachedStorages,
        generation: u64,
    ) -> bool {
        for sid in key.sids() {
            self.by_sid
                .entry(sid.clone())
                .or_default()
                .insert(key.clone());
        }
        for storage in storages.iter() {
            self.by_storage
                .entry(storage.id)
                .or_default()
                .insert(key.clone());
        }
        self.cache.insert(key.clone(), storages).await;

        if self.generation() != generation {
            self.invalidate(&key).await;
            return false;
        }
        true
    }

    /// Removes one entry.
    pub async fn invalidate(&self, key: &SidSetKey) {
        self.forget_key(key);
        self.cache.invalidate(key).await;
    }

    /// Drops every entry a write to `storage_id` touching `sids` may affect.
    ///
    /// Bumps the generation first so in-flight readers discard their result.
    pub async fn invalidate_for_write(&self, storage_id: StorageId, sids: &[Sid]) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut stale: HashSet<SidSetKey> = HashSet::new();
        if let Some((_, keys)) = self.by_storage.remove(&storage_id) {
            stale.extend(keys);
        }
        for sid in sids {
            if let Some((_, keys)) = self.by_sid.remove(sid) {
                stale.extend(keys);
            }
        }

        for key in &stale {
            self.forget_key(key);
            self.cache.invalidate(key).await;
        }
        metrics::counter!("pathgrant_index_cache_invalidations_total")
            .increment(stale.len() as u64);
    }

    /// Removes `key` from the sid index.
    ///
    /// `by_storage` may keep keys that are no longer cached; they are dropped
    /// the next time that storage is written.
    fn forget_key(&self, key: &SidSetKey) {
        for sid in key.sids() {
            if let Some(mut keys) = self.by_sid.get_mut(sid) {
                keys.remove(key);
            }
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance tasks. Useful for testing TTL behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Registers index cache metric descriptions.
///
/// Call once during startup.
pub fn register_index_cache_metrics() {
    metrics::describe_counter!(
        "pathgrant_index_cache_hits_total",
        "Total number of read-allowed storage cache hits"
    );
    metrics::describe_counter!(
        "pathgrant_index_cache_misses_total",
        "Total number of read-allowed storage cache misses"
    );
    metrics::describe_counter!(
        "pathgrant_index_cache_invalidations_total",
        "Total number of read-allowed storage entries dropped by writes"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StorageKind;

    fn enabled() -> IndexCache {
        IndexCache::new(IndexCacheConfig::default().with_enabled(true))
    }

    fn set(storages: &[StorageRef]) -> CachedStorages {
        Arc::new(storages.iter().copied().collect())
    }

    const S3: StorageRef = StorageRef {
        id: 1,
        kind: StorageKind::S3,
    };
    const NFS: StorageRef = StorageRef {
        id: 2,
        kind: StorageKind::Nfs,
    };

    #[test]
    fn test_config_defaults_to_disabled() {
        let config = IndexCacheConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.max_capacity, 10_000);
    }

    #[test]
    fn test_sid_set_key_ignores_order_and_duplicates() {
        let a = SidSetKey::new(&[Sid::group("lab"), Sid::user("alice"), Sid::group("lab")]);
        let b = SidSetKey::new(&[Sid::user("alice"), Sid::group("lab")]);
        assert_eq!(a, b);
        assert_eq!(a.sids().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = enabled();
        let key = SidSetKey::new(&[Sid::user("alice")]);

        assert!(cache.get(&key).await.is_none());
        assert!(cache.insert_if_current(key.clone(), set(&[S3]), cache.generation()).await);
        assert_eq!(cache.get(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_for_sid_invalidates_sets_containing_it() {
        let cache = enabled();
        let alice = SidSetKey::new(&[Sid::user("alice"), Sid::group("lab")]);
        let bob = SidSetKey::new(&[Sid::user("bob")]);
        cache.insert_if_current(alice.clone(), set(&[]), 0).await;
        cache.insert_if_current(bob.clone(), set(&[]), 0).await;

        // A first grant for group lab on storage 9 must surface for alice.
        cache.invalidate_for_write(9, &[Sid::group("lab")]).await;

        assert!(cache.get(&alice).await.is_none());
        assert!(cache.get(&bob).await.is_some());
    }

    #[tokio::test]
    async fn test_write_to_storage_invalidates_results_containing_it() {
        let cache = enabled();
        let alice = SidSetKey::new(&[Sid::user("alice")]);
        let bob = SidSetKey::new(&[Sid::user("bob")]);
        cache.insert_if_current(alice.clone(), set(&[S3]), 0).await;
        cache.insert_if_current(bob.clone(), set(&[NFS]), 0).await;

        cache.invalidate_for_write(S3.id, &[]).await;

        assert!(cache.get(&alice).await.is_none());
        assert!(cache.get(&bob).await.is_some());
    }

    #[tokio::test]
    async fn test_result_computed_before_write_is_not_kept() {
        let cache = enabled();
        let key = SidSetKey::new(&[Sid::user("alice")]);
        let generation = cache.generation();

        cache.invalidate_for_write(S3.id, &[Sid::user("alice")]).await;
        let kept = cache.insert_if_current(key.clone(), set(&[S3]), generation).await;

        assert!(!kept);
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_entry_count_follows_writes() {
        let cache = enabled();
        let alice = SidSetKey::new(&[Sid::user("alice")]);
        let lab = SidSetKey::new(&[Sid::group("lab")]);
        cache.insert_if_current(alice, set(&[S3]), 0).await;
        cache.insert_if_current(lab, set(&[NFS]), 0).await;
        cache.run_pending_tasks().await;
        assert_eq!(cache.entry_count(), 2);

        cache.invalidate_for_write(S3.id, &[Sid::user("alice")]).await;
        cache.run_pending_tasks().await;
        assert_eq!(cache.entry_count(), 1);
    }
}
