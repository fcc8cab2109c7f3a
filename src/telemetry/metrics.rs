//! Metric instrument factories for jobq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"jobq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("jobq")
}

/// Counter: tasks offered to a worker queue.
/// Labels: `kind`, `result` ("ok" | "queue_full").
pub fn tasks_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("jobq.tasks.enqueued")
        .with_description("Number of tasks offered to worker queues")
        .build()
}

/// Counter: ledger status transitions.
/// Labels: `from`, `to`.
pub fn task_transitions() -> Counter<u64> {
    meter()
        .u64_counter("jobq.tasks.transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: worker checkins handled.
/// Labels: `envelope`.
pub fn checkins() -> Counter<u64> {
    meter()
        .u64_counter("jobq.checkins")
        .with_description("Number of worker checkins handled")
        .build()
}

/// Counter: returned tasks refused by the ledger.
/// Labels: `reason`.
pub fn results_rejected() -> Counter<u64> {
    meter()
        .u64_counter("jobq.results.rejected")
        .with_description("Returned tasks refused by the ledger")
        .build()
}

/// Histogram: size of files received from workers.
pub fn transfer_bytes() -> Histogram<u64> {
    meter()
        .u64_histogram("jobq.transfer.bytes")
        .with_description("Size of files received from workers")
        .with_unit("By")
        .build()
}
