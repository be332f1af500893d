//! Storage listing stage.
//!
//! The listing code path calls [`ListingPipeline::list`] explicitly after it
//! has the base ACL view. Nothing is intercepted implicitly.

use std::sync::Arc;

use pathgrant_domain::model::{SecuredStorage, Sid};
use pathgrant_domain::{
    apply_overlay, BaseAclProvider, DomainResult, PrincipalResolver, ReadAllowedStorageIndex,
};
use pathgrant_storage::PermissionStore;
use tracing::debug;

/// Composes the base ACL view with path-level grants.
pub struct ListingPipeline<S: ?Sized> {
    base_acl: Arc<dyn BaseAclProvider>,
    index: Arc<ReadAllowedStorageIndex<S>>,
}

impl<S: PermissionStore + ?Sized> ListingPipeline<S> {
    pub fn new(base_acl: Arc<dyn BaseAclProvider>, index: Arc<ReadAllowedStorageIndex<S>>) -> Self {
        Self { base_acl, index }
    }

    /// Storages the principal may list, with their effective mask.
    pub async fn list(&self, principal: &dyn PrincipalResolver) -> DomainResult<Vec<SecuredStorage>> {
        let sids = principal.current_sids().await?;
        let (base, read_allowed) = futures::try_join!(
            self.base_acl.storages_with_base_mask(&sids),
            self.index.load_read_allowed_storages(&sids),
        )?;
        let total = base.len();
        let listed = apply_overlay(base, &read_allowed);
        debug!(total, listed = listed.len(), "applied listing overlay");
        Ok(listed)
    }

    /// Applies the overlay to a base view the caller already holds.
    pub async fn overlay(
        &self,
        sids: &[Sid],
        base: Vec<SecuredStorage>,
    ) -> DomainResult<Vec<SecuredStorage>> {
        let read_allowed = self.index.load_read_allowed_storages(sids).await?;
        Ok(apply_overlay(base, &read_allowed))
    }
}
