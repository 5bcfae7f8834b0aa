//! Applications and their per-task bucket.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use super::rows::{ApplicationRow, BucketRow};
use super::tasks::lock_task;
use crate::error::{Error, Result};
use crate::model::*;

const BUCKET_SELECT: &str = "SELECT id, task_id, total_applications, reviewed_applications,
        approved_applications, rejected_applications, status, created_at, updated_at
     FROM application_buckets WHERE task_id = $1";

pub(super) async fn lock_bucket(
    conn: &mut PgConnection,
    task_id: TaskId,
) -> Result<Option<ApplicationBucket>> {
    let row: Option<BucketRow> = sqlx::query_as(&format!("{BUCKET_SELECT} FOR UPDATE"))
        .bind(task_id.0)
        .fetch_optional(conn)
        .await?;
    row.map(BucketRow::try_into_bucket).transpose()
}

/// Insert or overwrite the task's bucket row.
pub(super) async fn save_bucket(conn: &mut PgConnection, bucket: &ApplicationBucket) -> Result<()> {
    sqlx::query(
        "INSERT INTO application_buckets (id, task_id, total_applications, reviewed_applications,
            approved_applications, rejected_applications, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (task_id) DO UPDATE SET
            total_applications = EXCLUDED.total_applications,
            reviewed_applications = EXCLUDED.reviewed_applications,
            approved_applications = EXCLUDED.approved_applications,
            rejected_applications = EXCLUDED.rejected_applications,
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(bucket.id.0)
    .bind(bucket.task_id.0)
    .bind(bucket.total_applications as i32)
    .bind(bucket.reviewed_applications as i32)
    .bind(bucket.approved_applications as i32)
    .bind(bucket.rejected_applications as i32)
    .bind(bucket.status.to_string())
    .bind(bucket.created_at)
    .bind(bucket.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Close a bucket the caller already holds `FOR UPDATE`.
pub(super) async fn close_locked(
    conn: &mut PgConnection,
    bucket: &mut ApplicationBucket,
    outcome: BucketOutcome,
    now: DateTime<Utc>,
) -> Result<()> {
    bucket.close(outcome, now)?;
    save_bucket(conn, bucket).await
}

impl super::Db {
    /// Record an application and count it in the task's bucket.
    ///
    /// The task row lock serializes concurrent applications to one task, so
    /// the bucket total always equals the number of application rows.
    pub async fn insert_application(
        &self,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        let mut tx = self.pool.begin().await?;

        let task = lock_task(&mut *tx, new.task_id).await?;
        if !task.is_auto_assignable() {
            return Err(Error::NotAcceptingApplications {
                task_id: new.task_id,
                reason: format!("task is {} (auto_assign={})", task.status, task.auto_assign),
            });
        }

        let mut bucket = lock_bucket(&mut *tx, new.task_id)
            .await?
            .unwrap_or_else(|| ApplicationBucket::new(new.task_id, now));
        bucket.record(now)?;
        save_bucket(&mut *tx, &bucket).await?;

        let inserted: Option<(uuid::Uuid,)> = sqlx::query_as(
            "INSERT INTO applications (id, task_id, worker_id, bucket_id, applied_at, selected)
             VALUES ($1, $2, $3, $4, $5, NULL)
             ON CONFLICT (task_id, worker_id) DO NOTHING
             RETURNING id",
        )
        .bind(ApplicationId::new().0)
        .bind(new.task_id.0)
        .bind(new.worker_id.0)
        .bind(bucket.id.0)
        .bind(new.applied_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            // Dropping the transaction rolls back the bucket increment.
            return Err(Error::DuplicateApplication {
                task_id: new.task_id,
                worker_id: new.worker_id,
            });
        }

        tx.commit().await?;
        Ok(bucket)
    }

    /// All applications for a task, earliest `applied_at` first.
    pub async fn list_applications(&self, task_id: TaskId) -> Result<Vec<Application>> {
        let rows: Vec<ApplicationRow> = sqlx::query_as(
            "SELECT id, task_id, worker_id, bucket_id, applied_at, selected
             FROM applications WHERE task_id = $1
             ORDER BY applied_at, received_at",
        )
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Application::from).collect())
    }

    pub async fn get_bucket(&self, task_id: TaskId) -> Result<Option<ApplicationBucket>> {
        let row: Option<BucketRow> = sqlx::query_as(BUCKET_SELECT)
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BucketRow::try_into_bucket).transpose()
    }

    /// `open -> reviewing`; a bucket already under review is left alone.
    pub async fn mark_reviewing(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut bucket = lock_bucket(&mut *tx, task_id)
            .await?
            .ok_or(Error::BucketNotFound(task_id))?;
        if bucket.begin_review(now) {
            save_bucket(&mut *tx, &bucket).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn close_bucket_row(
        &self,
        task_id: TaskId,
        outcome: BucketOutcome,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        let mut tx = self.pool.begin().await?;
        let mut bucket = lock_bucket(&mut *tx, task_id)
            .await?
            .ok_or(Error::BucketNotFound(task_id))?;
        close_locked(&mut *tx, &mut bucket, outcome, now).await?;
        tx.commit().await?;
        Ok(bucket)
    }
}
