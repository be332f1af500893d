//! Effective permission resolution.
//!
//! For one sid, the winning row is the most specific one on the candidate
//! chain of the queried path (see [`crate::path::candidates`]). Winning masks
//! of all sids in the principal's set are combined with bitwise OR; there is
//! no deny bit. A result of [`Mask::NONE`] means "no path-level grant", not an
//! error.

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use pathgrant_storage::PermissionStore;
use tracing::{debug, instrument};

use crate::error::DomainResult;
use crate::model::{Mask, PathRef, Sid, StorageId, StoredPermission};
use crate::path::{applies_to, candidates, normalize_ref};

/// Resolves effective path-level masks against a [`PermissionStore`].
pub struct PermissionResolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PermissionStore + ?Sized> PermissionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Effective mask for one path.
    pub async fn resolve(
        &self,
        storage_id: StorageId,
        target: &PathRef,
        sids: &[Sid],
    ) -> DomainResult<Mask> {
        let target = normalize_ref(target)?;
        let masks = self
            .resolve_normalized(storage_id, BTreeSet::from([target.clone()]), sids)
            .await?;
        Ok(masks.get(&target).copied().unwrap_or(Mask::NONE))
    }

    /// Effective masks for many paths, in a single store query.
    ///
    /// The returned map is keyed by the normalized form of each requested
    /// path; duplicates are answered once.
    #[instrument(skip(self, targets, sids), fields(paths = targets.len(), sids = sids.len()))]
    pub async fn resolve_batch(
        &self,
        storage_id: StorageId,
        targets: &[PathRef],
        sids: &[Sid],
    ) -> DomainResult<HashMap<PathRef, Mask>> {
        let targets = targets
            .iter()
            .map(normalize_ref)
            .collect::<DomainResult<BTreeSet<_>>>()?;
        self.resolve_normalized(storage_id, targets, sids).await
    }

    async fn resolve_normalized(
        &self,
        storage_id: StorageId,
        targets: BTreeSet<PathRef>,
        sids: &[Sid],
    ) -> DomainResult<HashMap<PathRef, Mask>> {
        let sids: BTreeSet<&Sid> = sids.iter().collect();
        if sids.is_empty() || targets.is_empty() {
            return Ok(targets.into_iter().map(|t| (t, Mask::NONE)).collect());
        }

        let chain: BTreeSet<PathRef> = targets.iter().flat_map(candidates).collect();
        let chain: Vec<PathRef> = chain.into_iter().collect();
        let sid_list: Vec<Sid> = sids.iter().map(|s| (*s).clone()).collect();
        let rows = self
            .store
            .find_applicable(storage_id, &chain, &sid_list)
            .await?;
        debug!(candidates = chain.len(), rows = rows.len(), "loaded applicable rows");

        let mut by_sid: HashMap<&Sid, Vec<&StoredPermission>> = HashMap::new();
        for row in &rows {
            by_sid.entry(&row.sid).or_default().push(row);
        }

        Ok(targets
            .into_iter()
            .map(|target| {
                let mask = by_sid
                    .values()
                    .filter_map(|sid_rows| winning_mask(sid_rows, &target))
                    .fold(Mask::NONE, |acc, mask| acc | mask);
                (target, mask)
            })
            .collect())
    }
}

/// Mask of the most specific row of one sid that applies to `target`.
fn winning_mask(rows: &[&StoredPermission], target: &PathRef) -> Option<Mask> {
    rows.iter()
        .filter(|row| applies_to(&row.path, row.path_type, target))
        .max_by_key(|row| row.path.len())
        .map(|row| row.mask)
}
