//! Shared metrics recording for storage backends.

use std::time::Instant;

/// Records `storage_operations_total` and `storage_operation_duration_ms`
/// for one storage call.
///
/// # Examples
///
/// ```ignore
/// let start = Instant::now();
/// let result = do_write();
/// record_operation_metrics("sqlite", "store", start, result.is_ok());
/// ```
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    success: bool,
) {
    let status = if success { "success" } else { "error" };
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
