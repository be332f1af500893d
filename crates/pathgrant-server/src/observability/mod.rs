//! Logging and metric descriptions.

pub mod logging;
pub mod metrics;

pub use self::logging::init_logging;
pub use self::metrics::register_metrics;
