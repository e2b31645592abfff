//! Metric instrument factories for canvas-runtime.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("canvas-runtime")
}

/// Counter: completed save tasks.
/// Labels: `result` ("saved" | "skipped" | "failed" | "conflicted").
pub fn saves() -> Counter<u64> {
    meter()
        .u64_counter("canvas.save.completed")
        .with_description("Number of save tasks by result")
        .build()
}

/// Counter: version conflicts seen by the persistence queue.
pub fn version_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("canvas.save.conflicts")
        .with_description("Writes refused because the store held a newer version")
        .build()
}

/// Histogram: wall time of a save task, retries included.
pub fn save_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("canvas.save.duration_ms")
        .with_description("Save task duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: saves that outlived the stall bound.
pub fn stall_warnings() -> Counter<u64> {
    meter()
        .u64_counter("canvas.save.stalls")
        .with_description("Save tasks that exceeded the stall timeout")
        .build()
}

/// Counter: hydrations.
/// Labels: `result` ("ok" | "error").
pub fn hydrations() -> Counter<u64> {
    meter()
        .u64_counter("canvas.hydration.completed")
        .with_description("Number of hydration fetches by result")
        .build()
}

/// Counter: eviction attempts.
/// Labels: `result` ("evicted" | "refused" | "failed"), `trigger` ("explicit" | "capacity").
pub fn evictions() -> Counter<u64> {
    meter()
        .u64_counter("canvas.eviction.attempts")
        .with_description("Number of eviction attempts by result")
        .build()
}

/// Counter: backing store calls.
/// Labels: `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("canvas.store.operations")
        .with_description("Number of backing store operations")
        .build()
}
