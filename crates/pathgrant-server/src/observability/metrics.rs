//! Metric descriptions.
//!
//! Only the `metrics` facade is used; installing a recorder or exporter is
//! left to the embedding process.

/// Describes every metric the engine records. Call once during startup,
/// after the recorder is installed.
pub fn register_metrics() {
    metrics::describe_histogram!(
        "pathgrant_storage_query_duration_seconds",
        "Storage query duration in seconds by operation, backend, and status"
    );
    metrics::describe_counter!(
        "pathgrant_storage_query_timeout_total",
        "Total number of storage query timeouts by operation and backend"
    );
    metrics::describe_histogram!(
        "pathgrant_storage_health_check_duration_seconds",
        "Storage health check duration in seconds by backend and status"
    );

    pathgrant_domain::index::register_index_cache_metrics();
}
