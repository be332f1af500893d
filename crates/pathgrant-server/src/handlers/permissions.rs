//! Batch permission requests.
//!
//! Request shapes carry the storage id together with the storage kind the
//! caller expects; the catalog rejects requests whose kind does not match.
//! All JSON field names are camelCase.

use std::collections::HashMap;
use std::sync::Arc;

use pathgrant_domain::model::{
    GrantRequest, Mask, PathRef, PathType, PermissionKey, Sid, SidType, StorageId, StorageKind,
    StorageRef, StoredPermission,
};
use pathgrant_domain::path::{normalize, normalize_ref};
use pathgrant_domain::{DomainError, PrincipalResolver};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::PermissionEngine;

/// A `(path, pathType)` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathItem {
    pub path: String,
    pub path_type: PathType,
}

impl From<PathItem> for PathRef {
    fn from(item: PathItem) -> Self {
        PathRef::new(item.path, item.path_type)
    }
}

impl From<PathRef> for PathItem {
    fn from(path: PathRef) -> Self {
        Self {
            path: path.path,
            path_type: path.path_type,
        }
    }
}

/// A permission row as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    pub path: String,
    pub path_type: PathType,
    pub sid: Sid,
    pub mask: Mask,
}

impl From<StoredPermission> for PermissionEntry {
    fn from(row: StoredPermission) -> Self {
        Self {
            path: row.path,
            path_type: row.path_type,
            sid: row.sid,
            mask: row.mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBatchRequest {
    pub storage_id: StorageId,
    #[serde(rename = "type")]
    pub storage_kind: StorageKind,
    pub requests: Vec<PathItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertBatchRequest {
    pub storage_id: StorageId,
    #[serde(rename = "type")]
    pub storage_kind: StorageKind,
    pub requests: Vec<GrantRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBatchRequest {
    pub storage_id: StorageId,
    #[serde(rename = "type")]
    pub storage_kind: StorageKind,
    pub requests: Vec<PermissionKey>,
}

/// Deletes every row under each path, or prolongs the paths instead when
/// `daysToProlong` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllBatchRequest {
    pub storage_id: StorageId,
    #[serde(rename = "type")]
    pub storage_kind: StorageKind,
    pub requests: Vec<PathItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_to_prolong: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllBatchResponse {
    /// Rows removed. Empty for a prolongation.
    pub removed: Vec<PermissionKey>,
    /// Paths prolonged. Empty for a deletion.
    pub prolonged: Vec<PathItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub storage_id: StorageId,
    #[serde(rename = "type")]
    pub storage_kind: StorageKind,
    pub source: PathItem,
    pub destination: PathItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResponse {
    pub migrated: usize,
}

/// Effective masks of the current principal for several paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBatchRequest {
    pub storage_id: StorageId,
    pub requests: Vec<PathItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPermission {
    pub path: String,
    pub path_type: PathType,
    pub mask: Mask,
}

/// Errors returned by request handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Principal carries no USER sid to attribute a prolongation to.
    #[error("principal has no user identity")]
    MissingUser,

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Maps request shapes onto engine components.
pub struct PermissionHandler {
    engine: Arc<PermissionEngine>,
}

impl PermissionHandler {
    pub fn new(engine: Arc<PermissionEngine>) -> Self {
        Self { engine }
    }

    pub async fn load_batch(&self, request: LoadBatchRequest) -> HandlerResult<Vec<PermissionEntry>> {
        let storage = StorageRef::new(request.storage_id, request.storage_kind);
        let paths = request.requests.into_iter().map(PathRef::from).collect();
        let rows = self.engine.batch().load_batch(storage, paths).await?;
        Ok(rows.into_iter().map(PermissionEntry::from).collect())
    }

    pub async fn insert_batch(
        &self,
        request: InsertBatchRequest,
    ) -> HandlerResult<Vec<PermissionEntry>> {
        let storage = StorageRef::new(request.storage_id, request.storage_kind);
        let rows = self
            .engine
            .batch()
            .insert_batch(storage, request.requests)
            .await?;
        Ok(rows.into_iter().map(PermissionEntry::from).collect())
    }

    pub async fn delete_batch(
        &self,
        request: DeleteBatchRequest,
    ) -> HandlerResult<Vec<PermissionKey>> {
        let storage = StorageRef::new(request.storage_id, request.storage_kind);
        Ok(self
            .engine
            .batch()
            .delete_batch(storage, request.requests)
            .await?)
    }

    /// Cascading delete, or prolongation on behalf of `principal` when the
    /// request carries `daysToProlong`.
    pub async fn delete_all_batch(
        &self,
        request: DeleteAllBatchRequest,
        principal: &dyn PrincipalResolver,
    ) -> HandlerResult<DeleteAllBatchResponse> {
        let storage = StorageRef::new(request.storage_id, request.storage_kind);

        let Some(days) = request.days_to_prolong else {
            let roots = request.requests.into_iter().map(PathRef::from).collect();
            let removed = self.engine.migrator().delete_all_batch(storage, roots).await?;
            return Ok(DeleteAllBatchResponse {
                removed,
                prolonged: Vec::new(),
            });
        };

        let user = principal
            .current_sids()
            .await?
            .into_iter()
            .find(|sid| sid.sid_type == SidType::User)
            .ok_or(HandlerError::MissingUser)?;
        // Records come back keyed by normalized path, one per distinct path.
        let path_types = request
            .requests
            .iter()
            .map(|r| Ok((normalize(&r.path)?, r.path_type)))
            .collect::<Result<HashMap<String, PathType>, DomainError>>()?;
        let paths = request.requests.into_iter().map(|r| r.path).collect();
        let stored = self
            .engine
            .migrator()
            .prolong_batch(storage, paths, &user.name, days)
            .await?;
        info!(
            storage_id = storage.id,
            user = %user.name,
            days,
            "prolonged instead of deleting"
        );

        Ok(DeleteAllBatchResponse {
            removed: Vec::new(),
            prolonged: stored
                .into_iter()
                .map(|record| PathItem {
                    path_type: path_types
                        .get(&record.path)
                        .copied()
                        .unwrap_or(PathType::Folder),
                    path: record.path,
                })
                .collect(),
        })
    }

    pub async fn move_path(&self, request: MoveRequest) -> HandlerResult<MoveResponse> {
        let storage = StorageRef::new(request.storage_id, request.storage_kind);
        let migrated = self
            .engine
            .migrator()
            .move_path(storage, request.source.into(), request.destination.into())
            .await?;
        Ok(MoveResponse { migrated })
    }

    /// Effective masks for the current principal, in request order.
    pub async fn resolve_batch(
        &self,
        request: ResolveBatchRequest,
        principal: &dyn PrincipalResolver,
    ) -> HandlerResult<Vec<ResolvedPermission>> {
        let sids = principal.current_sids().await?;
        let targets: Vec<PathRef> = request.requests.into_iter().map(PathRef::from).collect();
        let masks = self
            .engine
            .resolver()
            .resolve_batch(request.storage_id, &targets, &sids)
            .await?;
        debug!(storage_id = request.storage_id, paths = masks.len(), "resolved masks");

        // Keys of `masks` are normalized; targets already passed normalization.
        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            let normalized = normalize_ref(&target)?;
            let mask = masks.get(&normalized).copied().unwrap_or(Mask::NONE);
            resolved.push(ResolvedPermission {
                path: normalized.path,
                path_type: normalized.path_type,
                mask,
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathgrant_domain::Principal;

    const STORAGE: StorageRef = StorageRef {
        id: 42,
        kind: StorageKind::S3,
    };

    async fn handler() -> PermissionHandler {
        let engine = PermissionEngine::in_memory();
        engine.register_storage(STORAGE).await.unwrap();
        PermissionHandler::new(Arc::new(engine))
    }

    fn alice() -> Principal {
        Principal::new("alice").with_groups(["lab"])
    }

    #[test]
    fn test_request_shapes_use_camel_case() {
        let json = serde_json::json!({
            "storageId": 42,
            "type": "S3",
            "requests": [{"path": "/proj", "pathType": "FOLDER"}],
            "daysToProlong": 7
        });

        let request: DeleteAllBatchRequest = serde_json::from_value(json).unwrap();

        assert_eq!(request.storage_kind, StorageKind::S3);
        assert_eq!(request.days_to_prolong, Some(7));
        assert_eq!(request.requests[0].path_type, PathType::Folder);
    }

    #[tokio::test]
    async fn test_insert_then_load() {
        let handler = handler().await;
        let inserted = handler
            .insert_batch(InsertBatchRequest {
                storage_id: 42,
                storage_kind: StorageKind::S3,
                requests: vec![GrantRequest::new(
                    "/proj",
                    PathType::Folder,
                    Sid::user("alice"),
                    Mask::READ,
                )],
            })
            .await
            .unwrap();
        assert_eq!(inserted[0].path, "proj");

        let loaded = handler
            .load_batch(LoadBatchRequest {
                storage_id: 42,
                storage_kind: StorageKind::S3,
                requests: vec![PathItem {
                    path: "proj".to_string(),
                    path_type: PathType::Folder,
                }],
            })
            .await
            .unwrap();
        assert_eq!(loaded, inserted);
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_rejected() {
        let handler = handler().await;

        let result = handler
            .load_batch(LoadBatchRequest {
                storage_id: 42,
                storage_kind: StorageKind::Nfs,
                requests: vec![PathItem {
                    path: "proj".to_string(),
                    path_type: PathType::Folder,
                }],
            })
            .await;

        assert!(matches!(
            result,
            Err(HandlerError::Domain(DomainError::StorageKindMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_all_with_days_prolongs_instead() {
        let handler = handler().await;
        handler
            .insert_batch(InsertBatchRequest {
                storage_id: 42,
                storage_kind: StorageKind::S3,
                requests: vec![GrantRequest::new("proj", PathType::Folder, Sid::user("alice"), Mask::READ)],
            })
            .await
            .unwrap();
        let request = |days| DeleteAllBatchRequest {
            storage_id: 42,
            storage_kind: StorageKind::S3,
            requests: vec![PathItem {
                path: "/proj".to_string(),
                path_type: PathType::Folder,
            }],
            days_to_prolong: days,
        };

        let prolonged = handler.delete_all_batch(request(Some(3)), &alice()).await.unwrap();
        assert!(prolonged.removed.is_empty());
        assert_eq!(prolonged.prolonged[0].path, "proj");
        let record = handler
            .engine
            .migrator()
            .find_prolongation(42, "proj/file")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.user_id, "alice");

        let deleted = handler.delete_all_batch(request(None), &alice()).await.unwrap();
        assert_eq!(deleted.removed.len(), 1);
        assert!(deleted.prolonged.is_empty());
    }

    #[tokio::test]
    async fn test_prolong_reports_each_distinct_path_with_its_type() {
        let handler = handler().await;
        let item = |path: &str, path_type| PathItem {
            path: path.to_string(),
            path_type,
        };

        let response = handler
            .delete_all_batch(
                DeleteAllBatchRequest {
                    storage_id: 42,
                    storage_kind: StorageKind::S3,
                    requests: vec![
                        item("/proj", PathType::Folder),
                        item("proj/", PathType::Folder),
                        item("docs/report.pdf", PathType::File),
                    ],
                    days_to_prolong: Some(2),
                },
                &alice(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.prolonged,
            vec![
                item("proj", PathType::Folder),
                item("docs/report.pdf", PathType::File),
            ]
        );
    }

    #[tokio::test]
    async fn test_prolong_with_out_of_range_days_is_rejected() {
        let handler = handler().await;
        let result = handler
            .delete_all_batch(
                DeleteAllBatchRequest {
                    storage_id: 42,
                    storage_kind: StorageKind::S3,
                    requests: vec![PathItem {
                        path: "proj".to_string(),
                        path_type: PathType::Folder,
                    }],
                    days_to_prolong: Some(u32::MAX),
                },
                &alice(),
            )
            .await;

        assert!(matches!(
            result,
            Err(HandlerError::Domain(DomainError::InvalidInput { .. }))
        ));
    }

    #[tokio::test]
    async fn test_prolong_requires_user_sid() {
        struct GroupsOnly;

        #[async_trait::async_trait]
        impl PrincipalResolver for GroupsOnly {
            async fn current_sids(&self) -> pathgrant_domain::DomainResult<Vec<Sid>> {
                Ok(vec![Sid::group("lab")])
            }
        }

        let handler = handler().await;
        let result = handler
            .delete_all_batch(
                DeleteAllBatchRequest {
                    storage_id: 42,
                    storage_kind: StorageKind::S3,
                    requests: vec![PathItem {
                        path: "proj".to_string(),
                        path_type: PathType::Folder,
                    }],
                    days_to_prolong: Some(1),
                },
                &GroupsOnly,
            )
            .await;

        assert!(matches!(result, Err(HandlerError::MissingUser)));
    }

    #[tokio::test]
    async fn test_move_and_resolve_for_principal() {
        let handler = handler().await;
        handler
            .insert_batch(InsertBatchRequest {
                storage_id: 42,
                storage_kind: StorageKind::S3,
                requests: vec![GrantRequest::new("src", PathType::Folder, Sid::group("lab"), Mask::WRITE)],
            })
            .await
            .unwrap();

        let moved = handler
            .move_path(MoveRequest {
                storage_id: 42,
                storage_kind: StorageKind::S3,
                source: PathItem {
                    path: "src".to_string(),
                    path_type: PathType::Folder,
                },
                destination: PathItem {
                    path: "dst".to_string(),
                    path_type: PathType::Folder,
                },
            })
            .await
            .unwrap();
        assert_eq!(moved.migrated, 1);

        let resolved = handler
            .resolve_batch(
                ResolveBatchRequest {
                    storage_id: 42,
                    requests: vec![
                        PathItem {
                            path: "/dst/a.txt".to_string(),
                            path_type: PathType::File,
                        },
                        PathItem {
                            path: "src/a.txt".to_string(),
                            path_type: PathType::File,
                        },
                    ],
                },
                &alice(),
            )
            .await
            .unwrap();
        assert_eq!(resolved[0].path, "dst/a.txt");
        assert_eq!(resolved[0].mask, Mask::WRITE);
        assert_eq!(resolved[1].mask, Mask::NONE);
    }
}
