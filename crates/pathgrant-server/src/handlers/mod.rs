//! Request handlers.

pub mod listing;
pub mod permissions;

pub use listing::ListingPipeline;
pub use permissions::{HandlerError, HandlerResult, PermissionHandler};
