//! Marketplace records the engine consumes: tasks and worker profiles.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::uuid_id;
use crate::error::{Error, Result};

uuid_id!(
    /// Task identifier, shared with the host's `tasks` table.
    TaskId
);
uuid_id!(
    /// A worker is a marketplace user with the worker role.
    WorkerId
);
uuid_id!(
    /// Any marketplace user; the recipient of a notification.
    UserId
);

impl From<WorkerId> for UserId {
    fn from(id: WorkerId) -> Self {
        UserId(id.0)
    }
}

/// Lifecycle of a task as tracked by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Assigned,
    Submitted,
    Approved,
    Rejected,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Open => "open",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "assigned" => Ok(TaskStatus::Assigned),
            "submitted" => Ok(TaskStatus::Submitted),
            "approved" => Ok(TaskStatus::Approved),
            "rejected" => Ok(TaskStatus::Rejected),
            other => Err(Error::Other(format!("unknown task status: {other}"))),
        }
    }
}

/// The slice of a host task the engine reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    /// Owner of the task's project. Receives window notifications.
    pub client_id: Option<UserId>,
    pub required_skills: BTreeSet<String>,
    pub auto_assign: bool,
    pub application_window_minutes: u32,
    pub status: TaskStatus,
    pub assignee_id: Option<WorkerId>,
}

impl TaskRecord {
    /// An open, unassigned task with auto-assignment enabled.
    pub fn new(title: impl Into<String>, window_minutes: u32) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            client_id: None,
            required_skills: BTreeSet::new(),
            auto_assign: true,
            application_window_minutes: window_minutes,
            status: TaskStatus::Open,
            assignee_id: None,
        }
    }

    pub fn required_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn client(mut self, client_id: UserId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn auto_assign(mut self, enabled: bool) -> Self {
        self.auto_assign = enabled;
        self
    }

    /// Open, unassigned, and still eligible for the engine.
    pub fn is_auto_assignable(&self) -> bool {
        self.status == TaskStatus::Open && self.auto_assign && self.assignee_id.is_none()
    }
}

/// The slice of a worker's profile that feeds scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: WorkerId,
    pub skills: BTreeSet<String>,
    /// 0..=5. `None` scores as zero.
    pub rating: Option<f64>,
}

impl WorkerProfile {
    pub fn new<I, S>(skills: I, rating: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: WorkerId::new(),
            skills: skills.into_iter().map(Into::into).collect(),
            rating: Some(rating),
        }
    }
}
