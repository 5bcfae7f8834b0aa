//! Reads of the host's task and user records.

use sqlx::PgConnection;
use uuid::Uuid;

use super::rows::{TaskRow, WorkerRow};
use crate::error::{Error, Result};
use crate::model::*;

/// Task columns, with the owning client taken from the task's project.
const TASK_SELECT: &str = "SELECT t.id, t.title, p.client_id,
        COALESCE(t.required_skills, '{}') AS required_skills,
        COALESCE(t.auto_assign, false) AS auto_assign,
        COALESCE(t.application_window_minutes, 60) AS application_window_minutes,
        COALESCE(t.status, 'open') AS status,
        t.assignee_id
     FROM tasks t LEFT JOIN projects p ON p.id = t.project_id
     WHERE t.id = $1";

/// Load a task and hold its row lock until the transaction ends.
pub(super) async fn lock_task(conn: &mut PgConnection, id: TaskId) -> Result<TaskRecord> {
    let row: Option<TaskRow> = sqlx::query_as(&format!("{TASK_SELECT} FOR UPDATE OF t"))
        .bind(id.0)
        .fetch_optional(conn)
        .await?;
    row.ok_or(Error::TaskNotFound(id))?.try_into_task()
}

impl super::Db {
    pub async fn get_task(&self, id: TaskId) -> Result<TaskRecord> {
        let row: Option<TaskRow> = sqlx::query_as(TASK_SELECT)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(Error::TaskNotFound(id))?.try_into_task()
    }

    pub async fn get_worker(&self, id: WorkerId) -> Result<WorkerProfile> {
        let row: Option<WorkerRow> = sqlx::query_as(
            "SELECT id, COALESCE(skills, '{}') AS skills, rating FROM users WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(WorkerProfile::from)
            .ok_or(Error::WorkerNotFound(id))
    }

    /// Profiles for the given workers in one round trip. Unknown ids are left out.
    pub async fn get_workers(&self, ids: &[WorkerId]) -> Result<Vec<WorkerProfile>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT id, COALESCE(skills, '{}') AS skills, rating FROM users WHERE id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WorkerProfile::from).collect())
    }
}
