//! The assignment engine: the public API the marketplace calls into.
//!
//! The engine owns the store handle, the notification outbox, and the clock.
//! Every state change goes through here under the affected task's lock.

pub mod evaluator;
mod locks;
pub mod scheduler;
pub mod sweep;

pub use evaluator::{Evaluation, RankedApplication, rank_applications, select_winner};
pub use scheduler::Scheduler;
pub use sweep::{SkipReason, SweepFailure, SweepOutcome, SweepReport};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::*;
use crate::notify::{Notification, NotificationOutbox, Notifier};
use crate::store::AssignmentStore;
use crate::telemetry::metrics;
use locks::TaskLocks;

/// Everything the engine knows about one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task: TaskRecord,
    pub timer: Option<AssignmentTimer>,
    pub bucket: Option<ApplicationBucket>,
    pub applications: Vec<Application>,
}

pub struct AssignmentEngine {
    store: Arc<dyn AssignmentStore>,
    outbox: NotificationOutbox,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    locks: TaskLocks,
    /// Held for the duration of a sweep pass so passes never overlap.
    sweep_gate: Mutex<()>,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            outbox: NotificationOutbox::new(notifier, config.retry_policy()),
            clock: Arc::new(SystemClock),
            config,
            locks: TaskLocks::default(),
            sweep_gate: Mutex::new(()),
        }
    }

    /// Replace the wall clock, e.g. with a [`crate::clock::ManualClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AssignmentStore> {
        &self.store
    }

    pub fn outbox(&self) -> &NotificationOutbox {
        &self.outbox
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A worker applied to a task.
    ///
    /// Returns the bucket after counting the application. A repeat
    /// application fails with [`Error::DuplicateApplication`] and changes
    /// nothing.
    pub async fn submit_application(
        &self,
        task_id: TaskId,
        worker_id: WorkerId,
        applied_at: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        let _guard = self.locks.lock(task_id).await;
        let new = NewApplication {
            task_id,
            worker_id,
            applied_at,
        };

        let result = self.store.record_application(new, self.clock.now()).await;
        let label = match &result {
            Ok(bucket) => {
                info!(
                    task_id = %task_id,
                    worker_id = %worker_id,
                    total = bucket.total_applications,
                    "application recorded"
                );
                "ok"
            }
            Err(Error::DuplicateApplication { .. }) => {
                info!(task_id = %task_id, worker_id = %worker_id, "worker already applied");
                "duplicate"
            }
            Err(Error::NotAcceptingApplications { reason, .. }) => {
                info!(task_id = %task_id, worker_id = %worker_id, reason, "application refused");
                "rejected"
            }
            Err(e) => {
                warn!(task_id = %task_id, worker_id = %worker_id, error = %e, "application failed");
                "error"
            }
        };
        metrics::applications_submitted().add(1, &[KeyValue::new("result", label)]);
        result
    }

    /// A task became eligible for auto-assignment. Starts its window.
    ///
    /// Returns `None` when `auto_assign` is off. Fails with
    /// [`Error::TimerAlreadyActive`] if a window is already running.
    pub async fn on_task_opened(
        &self,
        task_id: TaskId,
        auto_assign: bool,
        window_minutes: u32,
    ) -> Result<Option<AssignmentTimer>> {
        if !auto_assign {
            return Ok(None);
        }
        let _guard = self.locks.lock(task_id).await;

        let task = self.store.task(task_id).await?;
        if task.status != TaskStatus::Open || task.assignee_id.is_some() {
            return Err(Error::NotAcceptingApplications {
                task_id,
                reason: format!("task is {}", task.status),
            });
        }

        let timer = self
            .store
            .start_timer(
                task_id,
                window_minutes,
                self.config.max_extensions,
                self.clock.now(),
            )
            .await
            .inspect_err(|e| warn!(task_id = %task_id, error = %e, "cannot start timer"))?;
        info!(
            task_id = %task_id,
            window_minutes,
            window_end = %timer.window_end,
            "assignment window opened"
        );
        Ok(Some(timer))
    }

    /// Auto-assignment was switched off for a task. Clears the task's
    /// `auto_assign` flag and cancels any running window without
    /// evaluating, so later applications are refused and `evaluate` assigns
    /// nothing. Idempotent.
    pub async fn on_auto_assign_disabled(
        &self,
        task_id: TaskId,
    ) -> Result<Option<AssignmentTimer>> {
        let _guard = self.locks.lock(task_id).await;
        let was_active = self
            .store
            .timer(task_id)
            .await?
            .is_some_and(|t| t.status == TimerStatus::Active);
        let timer = self
            .store
            .abandon_auto_assign(task_id, self.clock.now())
            .await?;
        if !was_active {
            return Ok(timer);
        }
        metrics::timers_finished().add(
            1,
            &[
                KeyValue::new("status", "cancelled"),
                KeyValue::new("reason", "disabled"),
            ],
        );
        info!(task_id = %task_id, "auto-assignment disabled, window cancelled");
        Ok(timer)
    }

    /// Current task, timer, bucket, and applications.
    pub async fn inspect(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        Ok(TaskSnapshot {
            task: self.store.task(task_id).await?,
            timer: self.store.timer(task_id).await?,
            bucket: self.store.bucket(task_id).await?,
            applications: self.store.applications(task_id).await?,
        })
    }

    /// Hand notifications to the outbox. Never fails; see [`NotificationOutbox`].
    async fn send_all(&self, notifications: Vec<Notification>) {
        let now = self.clock.now();
        for notification in notifications {
            self.outbox.deliver(notification, now).await;
        }
    }
}
