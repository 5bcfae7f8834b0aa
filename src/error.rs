//! Error types for auto-assign.

use thiserror::Error;

use crate::model::{TaskId, TimerStatus, WorkerId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("worker {worker_id} already applied to task {task_id}")]
    DuplicateApplication { task_id: TaskId, worker_id: WorkerId },

    #[error("task {task_id} is not accepting applications: {reason}")]
    NotAcceptingApplications { task_id: TaskId, reason: String },

    #[error("application bucket for task {0} is already closed")]
    BucketAlreadyClosed(TaskId),

    #[error("no application bucket for task {0}")]
    BucketNotFound(TaskId),

    #[error("an active assignment timer already exists for task {0}")]
    TimerAlreadyActive(TaskId),

    #[error("no assignment timer for task {0}")]
    TimerNotFound(TaskId),

    #[error("assignment timer for task {task_id} is {status}, not active")]
    TimerNotActive { task_id: TaskId, status: TimerStatus },

    #[error("invalid application window: {0} minutes")]
    InvalidWindow(i64),

    #[error("assignment commit failed for task {task_id}: {reason}")]
    AssignmentCommitFailed { task_id: TaskId, reason: String },

    #[error("invariant violated for task {task_id}: {detail}")]
    InvariantViolation { task_id: TaskId, detail: String },

    #[error("notification delivery failed: {0}")]
    NotificationDeliveryFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the next sweep pass may succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::AssignmentCommitFailed { .. } | Error::Database(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
