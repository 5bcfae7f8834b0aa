//! Postgres store: connection pool, migrations, and health check.
//!
//! Every [`AssignmentStore`] method runs as one transaction. Rows a method
//! changes are read `FOR UPDATE` first, so two processes sharing the
//! database serialize on the task row rather than on the engine's
//! in-process locks.

mod applications;
mod assignment;
mod notifications;
mod rows;
mod tasks;
mod timers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{AssignmentCommit, AssignmentStore, CommitOutcome};

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool, for host-side queries and test fixtures.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AssignmentStore for Db {
    async fn task(&self, id: TaskId) -> Result<TaskRecord> {
        self.get_task(id).await
    }

    async fn worker(&self, id: WorkerId) -> Result<WorkerProfile> {
        self.get_worker(id).await
    }

    async fn workers(&self, ids: &[WorkerId]) -> Result<Vec<WorkerProfile>> {
        self.get_workers(ids).await
    }

    async fn record_application(
        &self,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        self.insert_application(new, now).await
    }

    async fn applications(&self, task_id: TaskId) -> Result<Vec<Application>> {
        self.list_applications(task_id).await
    }

    async fn bucket(&self, task_id: TaskId) -> Result<Option<ApplicationBucket>> {
        self.get_bucket(task_id).await
    }

    async fn begin_review(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<()> {
        self.mark_reviewing(task_id, now).await
    }

    async fn close_bucket(
        &self,
        task_id: TaskId,
        outcome: BucketOutcome,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        self.close_bucket_row(task_id, outcome, now).await
    }

    async fn start_timer(
        &self,
        task_id: TaskId,
        window_minutes: u32,
        max_extensions: u32,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer> {
        self.insert_timer(task_id, window_minutes, max_extensions, now)
            .await
    }

    async fn timer(&self, task_id: TaskId) -> Result<Option<AssignmentTimer>> {
        self.get_timer(task_id).await
    }

    async fn due_timers(&self, now: DateTime<Utc>) -> Result<Vec<AssignmentTimer>> {
        self.list_due_timers(now).await
    }

    async fn extend_timer(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Extension> {
        self.extend_timer_row(task_id, now).await
    }

    async fn finish_timer(
        &self,
        task_id: TaskId,
        to: TimerStatus,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer> {
        self.finish_timer_row(task_id, to, now).await
    }

    async fn commit_assignment(&self, commit: AssignmentCommit) -> Result<CommitOutcome> {
        self.commit(commit).await
    }

    async fn abandon_auto_assign(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentTimer>> {
        self.abandon(task_id, now).await
    }
}
