//! Span helpers for sweeps and evaluations.

use tracing::Span;

use crate::model::TaskId;

/// Span around one sweep pass. `sweep.due` and `sweep.assigned` are filled
/// in as the pass progresses.
pub fn start_sweep_span() -> Span {
    tracing::info_span!(
        "assignment.sweep",
        "sweep.due" = tracing::field::Empty,
        "sweep.assigned" = tracing::field::Empty,
    )
}

/// Span around evaluating one task. `assignment.outcome` is recorded once
/// a decision is made.
pub fn start_evaluate_span(task_id: TaskId) -> Span {
    tracing::info_span!(
        "assignment.evaluate",
        "task.id" = %task_id,
        "assignment.applications" = tracing::field::Empty,
        "assignment.outcome" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, applications: usize, outcome: &str) {
    span.record("assignment.applications", applications);
    span.record("assignment.outcome", outcome);
}

/// Emit a timer state change inside `span`.
pub fn record_timer_transition(span: &Span, task_id: TaskId, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(task_id = %task_id, from, to, "timer_transition");
    });
}
