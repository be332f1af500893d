//! Storage error types.

use std::time::Duration;

use thiserror::Error;

use crate::model::{StorageId, StorageKind};

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage root not known to this store.
    #[error("storage not found: {storage_id}")]
    StorageNotFound { storage_id: StorageId },

    /// Storage is registered under a different kind.
    #[error("storage {storage_id} is registered as {registered}, not {requested}")]
    StorageKindMismatch {
        storage_id: StorageId,
        registered: StorageKind,
        requested: StorageKind,
    },

    /// Move destination already holds rows.
    #[error("destination already has permissions in storage {storage_id}: {path}")]
    DestinationOccupied { storage_id: StorageId, path: String },

    /// Database connection error.
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Transaction error.
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Query did not finish in time.
    #[error("query timeout: {operation} exceeded {timeout:?}")]
    QueryTimeout {
        operation: String,
        timeout: Duration,
    },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Health check failed.
    #[error("health check failed: {message}")]
    HealthCheckFailed { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Connection pool statistics reported by database backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub active_connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
}

/// Result of a storage health check.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency: Duration,
    /// `None` for backends without a connection pool.
    pub pool_stats: Option<PoolStats>,
    pub message: Option<String>,
}
