//! pathgrant-server: Request handling and wiring
//!
//! This crate turns the domain components into a running engine:
//! - Configuration loading (YAML + environment overrides)
//! - Logging and metric descriptions
//! - Backend selection and component wiring
//! - Batch request/response shapes and their handler
//! - Storage listing pipeline stage
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              pathgrant-server                │
//! ├─────────────────────────────────────────────┤
//! │  config.rs      - Configuration management  │
//! │  engine.rs      - Backend + component wiring│
//! │  observability/ - Logging, metrics          │
//! │  handlers/      - Request handlers          │
//! │    permissions.rs - Batch and move requests │
//! │    listing.rs     - Listing overlay stage   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod handlers;
pub mod observability;

// Re-exports for convenience
pub use config::{ConfigLoadError, EngineConfig};
pub use engine::{EngineError, PermissionEngine};
pub use handlers::{HandlerError, ListingPipeline, PermissionHandler};
