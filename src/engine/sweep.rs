//! The periodic pass over expired windows.
//!
//! For each active timer whose window has ended: evaluate if anyone applied,
//! otherwise extend the window, and once the extension budget is spent,
//! cancel it and switch the task's auto-assign off. A failure on one task is
//! recorded and the pass moves on.

use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{Instrument, error, info, warn};

use super::{AssignmentEngine, Evaluation};
use crate::error::{Error, Result};
use crate::model::*;
use crate::notify::Notification;
use crate::notify::outbox::RetryReport;
use crate::telemetry::{assignment, metrics};

/// Why an expired timer was closed without a decision or extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Another pass or caller already handled the timer.
    NoLongerDue,
    /// The task record is gone; its timer was cancelled.
    TaskMissing,
    /// The task left `open` (assigned by hand, or withdrawn).
    TaskNotOpen { status: TaskStatus },
    /// Auto-assign was switched off outside the engine.
    AutoAssignDisabled,
    /// The evaluator found nothing to assign.
    NothingAssigned,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoLongerDue => write!(f, "timer no longer due"),
            SkipReason::TaskMissing => write!(f, "task not found"),
            SkipReason::TaskNotOpen { status } => write!(f, "task is {status}"),
            SkipReason::AutoAssignDisabled => write!(f, "auto-assign disabled"),
            SkipReason::NothingAssigned => write!(f, "nothing to assign"),
        }
    }
}

/// What the sweep did with one expired timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    Assigned {
        winner: WorkerId,
    },
    Extended {
        extensions_count: u32,
        window_end: DateTime<Utc>,
    },
    /// Extension budget exhausted with no applicants.
    Cancelled,
    Skipped(SkipReason),
}

impl SweepOutcome {
    fn label(&self) -> &'static str {
        match self {
            SweepOutcome::Assigned { .. } => "assigned",
            SweepOutcome::Extended { .. } => "extended",
            SweepOutcome::Cancelled => "cancelled",
            SweepOutcome::Skipped(_) => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub task_id: TaskId,
    pub error: String,
    /// The timer is still active and the next pass will try again.
    pub retryable: bool,
}

/// Summary of one sweep pass.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    /// Expired timers found at the start of the pass.
    pub due: usize,
    pub assigned: Vec<(TaskId, WorkerId)>,
    pub extended: Vec<TaskId>,
    pub cancelled: Vec<TaskId>,
    pub skipped: Vec<(TaskId, SkipReason)>,
    pub failed: Vec<SweepFailure>,
    /// Notification retries handled at the start of the pass.
    pub notifications: RetryReport,
}

impl SweepReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            due: 0,
            assigned: Vec::new(),
            extended: Vec::new(),
            cancelled: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            notifications: RetryReport::default(),
        }
    }

    /// Tasks assigned during this pass.
    pub fn assigned_count(&self) -> usize {
        self.assigned.len()
    }

    fn push(&mut self, task_id: TaskId, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::Assigned { winner } => self.assigned.push((task_id, winner)),
            SweepOutcome::Extended { .. } => self.extended.push(task_id),
            SweepOutcome::Cancelled => self.cancelled.push(task_id),
            SweepOutcome::Skipped(reason) => self.skipped.push((task_id, reason)),
        }
    }
}

impl std::fmt::Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} due: {} assigned, {} extended, {} cancelled, {} skipped, {} failed",
            self.due,
            self.assigned.len(),
            self.extended.len(),
            self.cancelled.len(),
            self.skipped.len(),
            self.failed.len()
        )?;
        for (task, worker) in &self.assigned {
            writeln!(f, "  assigned   {task} -> {worker}")?;
        }
        for task in &self.extended {
            writeln!(f, "  extended   {task}")?;
        }
        for task in &self.cancelled {
            writeln!(f, "  cancelled  {task}")?;
        }
        for (task, reason) in &self.skipped {
            writeln!(f, "  skipped    {task}: {reason}")?;
        }
        for failure in &self.failed {
            writeln!(f, "  failed     {}: {}", failure.task_id, failure.error)?;
        }
        Ok(())
    }
}

impl AssignmentEngine {
    /// Run one pass over every expired window.
    ///
    /// Safe to call on demand; a call made while a pass is running waits
    /// for it to finish. Only a failure to list due timers is returned as
    /// an error; per-task failures land in [`SweepReport::failed`].
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let _pass = self.sweep_gate.lock().await;
        let span = assignment::start_sweep_span();
        let started = Instant::now();

        async {
            let now = self.clock.now();
            let mut report = SweepReport::new(now);
            report.notifications = self.outbox.retry_due(now).await;

            let due = self.store.due_timers(now).await?;
            report.due = due.len();
            span.record("sweep.due", due.len());

            for timer in due {
                let task_id = timer.task_id;
                match self.process_expired(task_id).await {
                    Ok((outcome, notifications)) => {
                        metrics::sweep_tasks().add(1, &[KeyValue::new("outcome", outcome.label())]);
                        report.push(task_id, outcome);
                        self.send_all(notifications).await;
                    }
                    Err(e) => {
                        metrics::sweep_tasks().add(1, &[KeyValue::new("outcome", "failed")]);
                        if matches!(e, Error::InvariantViolation { .. }) {
                            error!(task_id = %task_id, error = %e, "sweep hit an invariant violation");
                        } else {
                            warn!(task_id = %task_id, error = %e, "sweep failed for task");
                        }
                        report.failed.push(SweepFailure {
                            task_id,
                            retryable: e.is_retryable(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            span.record("sweep.assigned", report.assigned_count());
            metrics::sweep_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);
            if report.due > 0 {
                info!(
                    due = report.due,
                    assigned = report.assigned.len(),
                    extended = report.extended.len(),
                    cancelled = report.cancelled.len(),
                    skipped = report.skipped.len(),
                    failed = report.failed.len(),
                    "sweep finished"
                );
            }
            Ok(report)
        }
        .instrument(span.clone())
        .await
    }

    /// Decide one expired timer under its task lock. Task state is read
    /// fresh so external changes since the last pass take effect.
    async fn process_expired(
        &self,
        task_id: TaskId,
    ) -> Result<(SweepOutcome, Vec<Notification>)> {
        let _guard = self.locks.lock(task_id).await;
        let now = self.clock.now();
        let span = tracing::Span::current();

        let Some(timer) = self.store.timer(task_id).await? else {
            return Ok((SweepOutcome::Skipped(SkipReason::NoLongerDue), Vec::new()));
        };
        if !timer.is_due(now) {
            return Ok((SweepOutcome::Skipped(SkipReason::NoLongerDue), Vec::new()));
        }

        let task = match self.store.task(task_id).await {
            Ok(task) => task,
            Err(Error::TaskNotFound(_)) => {
                self.finish(task_id, TimerStatus::Cancelled, "task_missing", now)
                    .await?;
                return Ok((SweepOutcome::Skipped(SkipReason::TaskMissing), Vec::new()));
            }
            Err(e) => return Err(e),
        };

        if task.status != TaskStatus::Open || task.assignee_id.is_some() {
            self.finish(task_id, TimerStatus::Completed, "task_not_open", now)
                .await?;
            let reason = SkipReason::TaskNotOpen {
                status: task.status,
            };
            return Ok((SweepOutcome::Skipped(reason), Vec::new()));
        }
        if !task.auto_assign {
            self.finish(task_id, TimerStatus::Cancelled, "disabled", now)
                .await?;
            return Ok((
                SweepOutcome::Skipped(SkipReason::AutoAssignDisabled),
                Vec::new(),
            ));
        }

        let applications = self
            .store
            .bucket(task_id)
            .await?
            .map_or(0, |b| b.total_applications);

        if applications == 0 {
            return self.extend_or_abandon(&task, now, &span).await;
        }

        let (evaluation, notifications) = self.evaluate_locked(task_id).await?;
        match evaluation {
            Evaluation::Assigned { winner, .. } => {
                assignment::record_timer_transition(&span, task_id, "active", "completed");
                metrics::timers_finished().add(
                    1,
                    &[
                        KeyValue::new("status", "completed"),
                        KeyValue::new("reason", "assigned"),
                    ],
                );
                Ok((SweepOutcome::Assigned { winner }, notifications))
            }
            // The timer stays active so the broken bucket is reported on
            // every pass until someone repairs it.
            Evaluation::NoApplications => Err(Error::InvariantViolation {
                task_id,
                detail: format!("bucket counts {applications} applications but none were found"),
            }),
            Evaluation::NotEligible { .. } => {
                self.finish(task_id, TimerStatus::Completed, "nothing_assigned", now)
                    .await?;
                Ok((
                    SweepOutcome::Skipped(SkipReason::NothingAssigned),
                    notifications,
                ))
            }
        }
    }

    async fn extend_or_abandon(
        &self,
        task: &TaskRecord,
        now: DateTime<Utc>,
        span: &tracing::Span,
    ) -> Result<(SweepOutcome, Vec<Notification>)> {
        match self.store.extend_timer(task.id, now).await? {
            Extension::Extended(timer) => {
                metrics::window_extensions().add(1, &[]);
                info!(
                    task_id = %task.id,
                    extensions = timer.extensions_count,
                    max_extensions = timer.max_extensions,
                    window_end = %timer.window_end,
                    "no applications, window extended"
                );
                let notifications = task
                    .client_id
                    .map(|client| Notification::window_extended(client, task, &timer))
                    .into_iter()
                    .collect();
                Ok((
                    SweepOutcome::Extended {
                        extensions_count: timer.extensions_count,
                        window_end: timer.window_end,
                    },
                    notifications,
                ))
            }
            Extension::Exhausted(timer) => {
                self.store.abandon_auto_assign(task.id, now).await?;
                assignment::record_timer_transition(span, task.id, "active", "cancelled");
                metrics::timers_finished().add(
                    1,
                    &[
                        KeyValue::new("status", "cancelled"),
                        KeyValue::new("reason", "exhausted"),
                    ],
                );
                info!(
                    task_id = %task.id,
                    extensions = timer.extensions_count,
                    "extension budget exhausted, auto-assignment abandoned"
                );
                let notifications = task
                    .client_id
                    .map(|client| Notification::auto_assign_cancelled(client, task))
                    .into_iter()
                    .collect();
                Ok((SweepOutcome::Cancelled, notifications))
            }
            Extension::NotDue(_) => {
                Ok((SweepOutcome::Skipped(SkipReason::NoLongerDue), Vec::new()))
            }
        }
    }

    async fn finish(
        &self,
        task_id: TaskId,
        to: TimerStatus,
        reason: &'static str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store.finish_timer(task_id, to, now).await?;
        assignment::record_timer_transition(
            &tracing::Span::current(),
            task_id,
            "active",
            &to.to_string(),
        );
        metrics::timers_finished().add(
            1,
            &[
                KeyValue::new("status", to.to_string()),
                KeyValue::new("reason", reason),
            ],
        );
        Ok(())
    }
}
