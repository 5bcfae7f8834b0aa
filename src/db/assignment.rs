//! Composite transitions: committing a decision and abandoning auto-assign.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use super::applications::{close_locked, lock_bucket};
use super::tasks::lock_task;
use super::timers::{lock_timer, save_timer};
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{AssignmentCommit, CommitOutcome};

impl super::Db {
    /// Assign the task, settle every application, close the bucket, and
    /// complete the timer in one transaction.
    ///
    /// A database error mid-way rolls everything back and surfaces as
    /// [`Error::AssignmentCommitFailed`] so the next sweep retries it.
    pub async fn commit(&self, commit: AssignmentCommit) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = match commit_in(&mut *tx, commit).await {
            Ok(outcome) => outcome,
            Err(Error::Database(e)) => {
                return Err(Error::AssignmentCommitFailed {
                    task_id: commit.task_id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        tx.commit()
            .await
            .map_err(|e| Error::AssignmentCommitFailed {
                task_id: commit.task_id,
                reason: e.to_string(),
            })?;
        Ok(outcome)
    }

    /// Switch `auto_assign` off and cancel the timer if there is one. The
    /// task stays open.
    pub async fn abandon(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentTimer>> {
        let mut tx = self.pool.begin().await?;
        lock_task(&mut *tx, task_id).await?;

        let mut timer = lock_timer(&mut *tx, task_id).await?;
        if let Some(timer) = timer.as_mut() {
            if timer.finish(TimerStatus::Cancelled, now)? {
                save_timer(&mut *tx, timer).await?;
            }
        }

        sqlx::query("UPDATE tasks SET auto_assign = false, updated_at = $2 WHERE id = $1")
            .bind(task_id.0)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(timer)
    }
}

async fn commit_in(conn: &mut PgConnection, commit: AssignmentCommit) -> Result<CommitOutcome> {
    let task_id = commit.task_id;

    let task = lock_task(conn, task_id).await?;
    if !task.is_auto_assignable() {
        return Ok(CommitOutcome::Stale {
            status: task.status,
            auto_assign: task.auto_assign,
        });
    }

    let mut bucket = lock_bucket(conn, task_id)
        .await?
        .ok_or_else(|| Error::InvariantViolation {
            task_id,
            detail: "committing an assignment without an application bucket".to_string(),
        })?;
    if bucket.status == BucketStatus::Closed {
        return Err(Error::InvariantViolation {
            task_id,
            detail: "open task has a closed application bucket".to_string(),
        });
    }
    if bucket.total_applications != commit.expected_applications {
        return Err(Error::AssignmentCommitFailed {
            task_id,
            reason: format!(
                "bucket changed during evaluation ({} applications, expected {})",
                bucket.total_applications, commit.expected_applications
            ),
        });
    }

    let (applied,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM applications WHERE task_id = $1 AND worker_id = $2)",
    )
    .bind(task_id.0)
    .bind(commit.winner.0)
    .fetch_one(&mut *conn)
    .await?;
    if !applied {
        return Err(Error::InvariantViolation {
            task_id,
            detail: format!("winner {} never applied", commit.winner),
        });
    }

    let losers: Vec<(Uuid,)> = sqlx::query_as(
        "UPDATE applications SET selected = (worker_id = $2)
         WHERE task_id = $1
         RETURNING worker_id",
    )
    .bind(task_id.0)
    .bind(commit.winner.0)
    .fetch_all(&mut *conn)
    .await?;
    let losers: Vec<WorkerId> = losers
        .into_iter()
        .map(|(id,)| WorkerId(id))
        .filter(|id| *id != commit.winner)
        .collect();

    sqlx::query(
        "UPDATE tasks SET assignee_id = $2, status = 'assigned', updated_at = $3 WHERE id = $1",
    )
    .bind(task_id.0)
    .bind(commit.winner.0)
    .bind(commit.now)
    .execute(&mut *conn)
    .await?;

    close_locked(
        conn,
        &mut bucket,
        BucketOutcome::single_winner(commit.expected_applications),
        commit.now,
    )
    .await?;

    if let Some(mut timer) = lock_timer(conn, task_id).await? {
        if timer.finish(TimerStatus::Completed, commit.now)? {
            save_timer(conn, &timer).await?;
        }
    }

    Ok(CommitOutcome::Committed {
        winner: commit.winner,
        losers,
        bucket,
    })
}
