//! Storage seam for the engine.
//!
//! Every method is one atomic unit: it either applies completely or leaves
//! the store untouched. The engine composes them; it never mutates records
//! directly. Two backends ship with the crate: [`MemoryStore`] and the
//! Postgres-backed [`crate::db::Db`].

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::*;

/// A decision to hand `task_id` to `winner`.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentCommit {
    pub task_id: TaskId,
    pub winner: WorkerId,
    /// Bucket size the decision was based on. If more applications arrived
    /// since, the commit is refused so the newcomer is not rejected unseen.
    pub expected_applications: u32,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Task assigned, bucket closed, timer completed.
    Committed {
        winner: WorkerId,
        losers: Vec<WorkerId>,
        bucket: ApplicationBucket,
    },
    /// The task stopped being auto-assignable before the commit. Nothing changed.
    Stale { status: TaskStatus, auto_assign: bool },
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    // --- Collaborator records -------------------------------------------

    async fn task(&self, id: TaskId) -> Result<TaskRecord>;

    async fn worker(&self, id: WorkerId) -> Result<WorkerProfile>;

    /// Profiles for the given workers. Unknown ids are left out.
    async fn workers(&self, ids: &[WorkerId]) -> Result<Vec<WorkerProfile>> {
        let mut profiles = Vec::with_capacity(ids.len());
        for id in ids {
            match self.worker(*id).await {
                Ok(profile) => profiles.push(profile),
                Err(Error::WorkerNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(profiles)
    }

    // --- Applications and buckets ----------------------------------------

    /// Insert the application, creating the bucket if needed, and bump its
    /// total. Fails with `DuplicateApplication` on a repeat (task, worker).
    async fn record_application(
        &self,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket>;

    /// All applications for a task, earliest `applied_at` first.
    async fn applications(&self, task_id: TaskId) -> Result<Vec<Application>>;

    async fn bucket(&self, task_id: TaskId) -> Result<Option<ApplicationBucket>>;

    /// `open -> reviewing`. A no-op for a bucket already under review.
    async fn begin_review(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<()>;

    /// Close the bucket with final counters. `BucketAlreadyClosed` on repeat.
    async fn close_bucket(
        &self,
        task_id: TaskId,
        outcome: BucketOutcome,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket>;

    // --- Timers ------------------------------------------------------------

    /// Start a window. `TimerAlreadyActive` if one is running; a terminal
    /// timer from an earlier window is replaced.
    async fn start_timer(
        &self,
        task_id: TaskId,
        window_minutes: u32,
        max_extensions: u32,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer>;

    async fn timer(&self, task_id: TaskId) -> Result<Option<AssignmentTimer>>;

    /// Active timers whose window ended at or before `now`, oldest first.
    async fn due_timers(&self, now: DateTime<Utc>) -> Result<Vec<AssignmentTimer>>;

    async fn extend_timer(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Extension>;

    /// Move to `completed` or `cancelled`. Idempotent on terminal timers.
    async fn finish_timer(
        &self,
        task_id: TaskId,
        to: TimerStatus,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer>;

    // --- Composite transitions --------------------------------------------

    /// Assign the task, settle every application, close the bucket, and
    /// complete the timer, all at once.
    async fn commit_assignment(&self, commit: AssignmentCommit) -> Result<CommitOutcome>;

    /// Switch the task's `auto_assign` off and cancel its timer, if any,
    /// together. The task stays open for manual assignment. Idempotent.
    async fn abandon_auto_assign(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentTimer>>;
}
