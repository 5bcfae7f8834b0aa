//! Row types for sqlx::FromRow and their conversion into model records.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::*;

/// Counters are stored as INTEGER; negative values never reach the model.
fn count(value: i32) -> u32 {
    value.max(0) as u32
}

#[derive(sqlx::FromRow)]
pub(super) struct TaskRow {
    id: Uuid,
    title: String,
    client_id: Option<Uuid>,
    required_skills: Vec<String>,
    auto_assign: bool,
    application_window_minutes: i32,
    status: String,
    assignee_id: Option<Uuid>,
}

impl TaskRow {
    pub(super) fn try_into_task(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: TaskId(self.id),
            title: self.title,
            client_id: self.client_id.map(UserId),
            required_skills: self.required_skills.into_iter().collect(),
            auto_assign: self.auto_assign,
            application_window_minutes: count(self.application_window_minutes),
            status: self.status.parse()?,
            assignee_id: self.assignee_id.map(WorkerId),
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct WorkerRow {
    id: Uuid,
    skills: Vec<String>,
    rating: Option<f64>,
}

impl From<WorkerRow> for WorkerProfile {
    fn from(row: WorkerRow) -> Self {
        WorkerProfile {
            id: WorkerId(row.id),
            skills: row.skills.into_iter().collect(),
            rating: row.rating,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct ApplicationRow {
    id: Uuid,
    task_id: Uuid,
    worker_id: Uuid,
    bucket_id: Uuid,
    applied_at: DateTime<Utc>,
    selected: Option<bool>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Application {
            id: ApplicationId(row.id),
            task_id: TaskId(row.task_id),
            worker_id: WorkerId(row.worker_id),
            bucket_id: BucketId(row.bucket_id),
            applied_at: row.applied_at,
            selection: row.selected.into(),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct BucketRow {
    id: Uuid,
    task_id: Uuid,
    total_applications: i32,
    reviewed_applications: i32,
    approved_applications: i32,
    rejected_applications: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BucketRow {
    pub(super) fn try_into_bucket(self) -> Result<ApplicationBucket> {
        Ok(ApplicationBucket {
            id: BucketId(self.id),
            task_id: TaskId(self.task_id),
            total_applications: count(self.total_applications),
            reviewed_applications: count(self.reviewed_applications),
            approved_applications: count(self.approved_applications),
            rejected_applications: count(self.rejected_applications),
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct TimerRow {
    task_id: Uuid,
    application_window_minutes: i32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    extensions_count: i32,
    max_extensions: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TimerRow {
    pub(super) fn try_into_timer(self) -> Result<AssignmentTimer> {
        Ok(AssignmentTimer {
            task_id: TaskId(self.task_id),
            application_window_minutes: count(self.application_window_minutes),
            window_start: self.window_start,
            window_end: self.window_end,
            extensions_count: count(self.extensions_count),
            max_extensions: count(self.max_extensions),
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
