//! OTel metric instruments.
//!
//! Created from the global `MeterProvider`; without an OTLP endpoint they
//! are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("auto-assign")
}

/// Labels: `result` ("ok" | "duplicate" | "rejected" | "error").
pub fn applications_submitted() -> Counter<u64> {
    meter()
        .u64_counter("assignment.applications.submitted")
        .with_description("Worker applications received")
        .build()
}

/// Labels: `path` ("single" | "scored").
pub fn tasks_assigned() -> Counter<u64> {
    meter()
        .u64_counter("assignment.tasks.assigned")
        .with_description("Tasks assigned by the engine")
        .build()
}

pub fn window_extensions() -> Counter<u64> {
    meter()
        .u64_counter("assignment.window.extensions")
        .with_description("Application windows extended for lack of applicants")
        .build()
}

/// Labels: `status` ("completed" | "cancelled"), `reason`.
pub fn timers_finished() -> Counter<u64> {
    meter()
        .u64_counter("assignment.timers.finished")
        .with_description("Assignment timers moved to a terminal state")
        .build()
}

/// Labels: `kind`, `result` ("delivered" | "failed" | "dropped").
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("assignment.notifications")
        .with_description("Notification delivery attempts")
        .build()
}

/// Labels: `outcome` (see `SweepOutcome`).
pub fn sweep_tasks() -> Counter<u64> {
    meter()
        .u64_counter("assignment.sweep.tasks")
        .with_description("Expired timers processed by sweeps")
        .build()
}

pub fn sweep_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("assignment.sweep.duration_ms")
        .with_description("Sweep pass duration in milliseconds")
        .with_unit("ms")
        .build()
}
