// Metrics for lock operations
// Counters and gauges are emitted through the `metrics` facade; installing an
// exporter is left to the embedding application.

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::model::StorageMode;

pub const OPERATIONS_TOTAL: &str = "slotlock_operations_total";
pub const MEMORY_RECORDS: &str = "slotlock_memory_records";

/// Register metric descriptions
/// Should be called once at application startup
pub fn describe_metrics() {
    describe_counter!(
        OPERATIONS_TOTAL,
        "Total number of lock operations by backend, operation and outcome"
    );
    describe_gauge!(
        MEMORY_RECORDS,
        "Number of semaphore and shared-lock records held by the memory backend"
    );
}

/// Record the boolean outcome of one adapter operation
pub fn record_outcome(backend: StorageMode, operation: &'static str, success: bool) {
    counter!(
        OPERATIONS_TOTAL,
        "backend" => backend.to_string(),
        "operation" => operation,
        "outcome" => if success { "success" } else { "rejected" }
    )
    .increment(1);
}

/// Publish the memory backend record count (set by the sweeper)
pub fn set_memory_records(count: usize) {
    gauge!(MEMORY_RECORDS).set(count as f64);
}
