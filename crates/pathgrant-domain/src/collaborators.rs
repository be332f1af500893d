//! Boundaries to the systems around the engine.
//!
//! The engine never decides who the caller is, which storages exist, or what
//! the coarse storage-level ACL grants. Those answers come through the traits
//! below.

use std::sync::Arc;

use async_trait::async_trait;
use pathgrant_storage::PermissionStore;

use crate::error::{DomainError, DomainResult};
use crate::model::{SecuredStorage, Sid, StorageId, StorageKind, StorageRef};

/// Supplies the sid set of the current principal.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn current_sids(&self) -> DomainResult<Vec<Sid>>;
}

/// Supplies storages with their base (storage-level) ACL mask.
///
/// Every storage the listing may show must be returned, including ones the
/// base ACL grants nothing on (mask zero); the overlay can still surface
/// those.
#[async_trait]
pub trait BaseAclProvider: Send + Sync {
    async fn storages_with_base_mask(&self, sids: &[Sid]) -> DomainResult<Vec<SecuredStorage>>;
}

/// Knows which storages exist and their kind.
#[async_trait]
pub trait StorageCatalog: Send + Sync {
    async fn lookup(&self, storage_id: StorageId) -> DomainResult<Option<StorageKind>>;
}

/// Checks that `storage` exists with the kind the request names.
pub async fn require_storage(
    catalog: &dyn StorageCatalog,
    storage: StorageRef,
) -> DomainResult<StorageRef> {
    match catalog.lookup(storage.id).await? {
        None => Err(DomainError::StorageNotFound {
            storage_id: storage.id,
        }),
        Some(actual) if actual != storage.kind => Err(DomainError::StorageKindMismatch {
            storage_id: storage.id,
            actual,
            requested: storage.kind,
        }),
        Some(_) => Ok(storage),
    }
}

/// A user and the groups or roles it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// The user's own sid followed by one GROUP sid per group.
    pub fn sids(&self) -> Vec<Sid> {
        std::iter::once(Sid::user(self.name.clone()))
            .chain(self.groups.iter().cloned().map(Sid::group))
            .collect()
    }
}

#[async_trait]
impl PrincipalResolver for Principal {
    async fn current_sids(&self) -> DomainResult<Vec<Sid>> {
        Ok(self.sids())
    }
}

/// Catalog answered by the permission store's own storage roots: storages
/// that were registered explicitly or already hold rows.
pub struct StoreCatalog<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> StoreCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: PermissionStore + ?Sized> StorageCatalog for StoreCatalog<S> {
    async fn lookup(&self, storage_id: StorageId) -> DomainResult<Option<StorageKind>> {
        Ok(self.store.storage_kind(storage_id).await?)
    }
}
