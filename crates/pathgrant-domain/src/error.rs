//! Domain error types for permission operations.

use pathgrant_storage::{StorageError, StorageId, StorageKind};
use thiserror::Error;

/// Domain-specific errors for permission operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Path is empty or malformed after normalization.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Request field failed validation.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Storage is unknown to the catalog.
    #[error("storage not found: {storage_id}")]
    StorageNotFound { storage_id: StorageId },

    /// Request names a storage kind that differs from the catalog's.
    #[error("storage {storage_id} is {actual}, request names {requested}")]
    StorageKindMismatch {
        storage_id: StorageId,
        actual: StorageKind,
        requested: StorageKind,
    },

    /// Move destination already holds permissions.
    #[error("move conflict in storage {storage_id}: '{destination}' already has permissions")]
    MoveConflict {
        storage_id: StorageId,
        destination: String,
    },

    /// Batch carries no items.
    #[error("batch must contain at least one item")]
    EmptyBatch,

    /// Batch exceeds the configured size limit.
    #[error("batch of {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Failure reported by the permission store.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for DomainError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::StorageNotFound { storage_id } => DomainError::StorageNotFound { storage_id },
            StorageError::StorageKindMismatch {
                storage_id,
                registered,
                requested,
            } => DomainError::StorageKindMismatch {
                storage_id,
                actual: registered,
                requested,
            },
            StorageError::DestinationOccupied { storage_id, path } => DomainError::MoveConflict {
                storage_id,
                destination: path,
            },
            StorageError::InvalidInput { message } => DomainError::InvalidInput { message },
            other => DomainError::Storage(other),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
