//! pathgrant-storage: Storage layer for path-level permission rows
//!
//! This crate owns the lifetime of every permission row, including:
//! - Row types keyed by `(storage, path, path type, sid)`
//! - `PermissionStore` trait for batch reads and atomic per-storage writes
//! - In-memory implementation backed by a per-storage path trie
//! - PostgreSQL implementation for production
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              pathgrant-storage               │
//! ├─────────────────────────────────────────────┤
//! │  model.rs    - Row and key types            │
//! │  traits.rs   - PermissionStore trait        │
//! │  trie.rs     - Segment-keyed prefix tree    │
//! │  memory.rs   - In-memory implementation     │
//! │  postgres.rs - PostgreSQL implementation    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod traits;
mod trie;

// Re-export commonly used types
pub use error::{HealthStatus, PoolStats, StorageError, StorageResult};
pub use memory::MemoryPermissionStore;
pub use model::{
    Mask, PathRef, PathType, PermissionKey, Sid, SidType, StorageId, StorageKind, StorageRef,
    StoredPermission, StoredProlongation, PATH_SEPARATOR,
};
pub use postgres::{PostgresConfig, PostgresPermissionStore};
pub use traits::PermissionStore;
