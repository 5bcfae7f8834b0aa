//! Assignment timer rows: one per task, replaced when a new window starts.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use super::rows::TimerRow;
use super::tasks::lock_task;
use crate::error::{Error, Result};
use crate::model::*;

const TIMER_COLUMNS: &str = "task_id, application_window_minutes, window_start, window_end,
        extensions_count, max_extensions, status, created_at, updated_at";

pub(super) async fn lock_timer(
    conn: &mut PgConnection,
    task_id: TaskId,
) -> Result<Option<AssignmentTimer>> {
    let row: Option<TimerRow> = sqlx::query_as(&format!(
        "SELECT {TIMER_COLUMNS} FROM assignment_timers WHERE task_id = $1 FOR UPDATE"
    ))
    .bind(task_id.0)
    .fetch_optional(conn)
    .await?;
    row.map(TimerRow::try_into_timer).transpose()
}

pub(super) async fn save_timer(conn: &mut PgConnection, timer: &AssignmentTimer) -> Result<()> {
    sqlx::query(
        "INSERT INTO assignment_timers (task_id, application_window_minutes, window_start,
            window_end, extensions_count, max_extensions, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (task_id) DO UPDATE SET
            application_window_minutes = EXCLUDED.application_window_minutes,
            window_start = EXCLUDED.window_start,
            window_end = EXCLUDED.window_end,
            extensions_count = EXCLUDED.extensions_count,
            max_extensions = EXCLUDED.max_extensions,
            status = EXCLUDED.status,
            created_at = EXCLUDED.created_at,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(timer.task_id.0)
    .bind(timer.application_window_minutes as i32)
    .bind(timer.window_start)
    .bind(timer.window_end)
    .bind(timer.extensions_count as i32)
    .bind(timer.max_extensions as i32)
    .bind(timer.status.to_string())
    .bind(timer.created_at)
    .bind(timer.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

impl super::Db {
    /// Start a window for `task_id`. A terminal timer left from an earlier
    /// window is overwritten; an active one is an error.
    pub async fn insert_timer(
        &self,
        task_id: TaskId,
        window_minutes: u32,
        max_extensions: u32,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer> {
        let mut tx = self.pool.begin().await?;
        lock_task(&mut *tx, task_id).await?;

        let existing = lock_timer(&mut *tx, task_id).await?;
        if existing.is_some_and(|t| t.status == TimerStatus::Active) {
            return Err(Error::TimerAlreadyActive(task_id));
        }

        let timer = AssignmentTimer::new(task_id, window_minutes, max_extensions, now)?;
        save_timer(&mut *tx, &timer).await?;
        tx.commit().await?;
        Ok(timer)
    }

    pub async fn get_timer(&self, task_id: TaskId) -> Result<Option<AssignmentTimer>> {
        let row: Option<TimerRow> = sqlx::query_as(&format!(
            "SELECT {TIMER_COLUMNS} FROM assignment_timers WHERE task_id = $1"
        ))
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TimerRow::try_into_timer).transpose()
    }

    /// Active timers whose window ended at or before `now`, oldest first.
    pub async fn list_due_timers(&self, now: DateTime<Utc>) -> Result<Vec<AssignmentTimer>> {
        let rows: Vec<TimerRow> = sqlx::query_as(&format!(
            "SELECT {TIMER_COLUMNS} FROM assignment_timers
             WHERE status = 'active' AND window_end <= $1
             ORDER BY window_end, task_id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TimerRow::try_into_timer).collect()
    }

    /// Extend under the row lock. The timer is re-read there, so a second
    /// process arriving after the first one extended sees `NotDue`.
    pub async fn extend_timer_row(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Extension> {
        let mut tx = self.pool.begin().await?;
        let mut timer = lock_timer(&mut *tx, task_id)
            .await?
            .ok_or(Error::TimerNotFound(task_id))?;
        let extension = timer.extend(now)?;
        if matches!(extension, Extension::Extended(_)) {
            save_timer(&mut *tx, &timer).await?;
        }
        tx.commit().await?;
        Ok(extension)
    }

    pub async fn finish_timer_row(
        &self,
        task_id: TaskId,
        to: TimerStatus,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer> {
        let mut tx = self.pool.begin().await?;
        let mut timer = lock_timer(&mut *tx, task_id)
            .await?
            .ok_or(Error::TimerNotFound(task_id))?;
        if timer.finish(to, now)? {
            save_timer(&mut *tx, &timer).await?;
        }
        tx.commit().await?;
        Ok(timer)
    }
}
