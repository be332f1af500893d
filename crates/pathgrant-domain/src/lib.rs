//! pathgrant-domain: Path-level permission engine
//!
//! This crate contains the engine logic, independent of the storage backend:
//! - Path normalization and ancestor chains
//! - Effective permission resolution across a principal's sids
//! - Batch writes and path migration (delete-all, move, prolong)
//! - Read-allowed storage index and listing overlay
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               pathgrant-domain               │
//! ├─────────────────────────────────────────────┤
//! │  path/          - Path algebra              │
//! │  resolver/      - Effective mask resolution │
//! │  batch.rs       - Batch insert/delete/load  │
//! │  migrator.rs    - Delete-all, move, prolong │
//! │  gate.rs        - Per-storage write lock    │
//! │  index/         - Read-allowed storages     │
//! │  overlay.rs     - Listing overlay           │
//! │  collaborators  - External boundaries       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod collaborators;
pub mod error;
pub mod gate;
pub mod index;
pub mod migrator;
pub mod model;
pub mod overlay;
pub mod path;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use batch::{BatchConfig, BatchOperationProcessor, DEFAULT_MAX_BATCH_SIZE};
pub use collaborators::{
    require_storage, BaseAclProvider, Principal, PrincipalResolver, StorageCatalog, StoreCatalog,
};
pub use error::{DomainError, DomainResult};
pub use gate::WriteGate;
pub use index::{IndexCache, IndexCacheConfig, ReadAllowedStorageIndex};
pub use migrator::PathMigrator;
pub use model::{GrantRequest, SecuredStorage};
pub use overlay::{apply_overlay, clamp_mount_disabled};
pub use resolver::PermissionResolver;
