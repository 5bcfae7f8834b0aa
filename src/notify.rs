//! Notifications the engine asks the host to deliver.
//!
//! The engine only describes who should hear what. Delivery belongs to a
//! [`Notifier`]; failed deliveries are parked in the [`NotificationOutbox`]
//! and retried without touching the assignment that produced them.

pub mod outbox;

pub use outbox::{NotificationOutbox, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{AssignmentTimer, TaskRecord, UserId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Assigned,
    NotSelected,
    WindowExtended,
    AutoAssignCancelled,
}

impl NotificationKind {
    /// Severity in the host's notification feed.
    pub fn level(self) -> &'static str {
        match self {
            NotificationKind::Assigned => "success",
            NotificationKind::NotSelected | NotificationKind::WindowExtended => "info",
            NotificationKind::AutoAssignCancelled => "warning",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationKind::Assigned => "assigned",
            NotificationKind::NotSelected => "not_selected",
            NotificationKind::WindowExtended => "window_extended",
            NotificationKind::AutoAssignCancelled => "auto_assign_cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn assigned(worker: WorkerId, task: &TaskRecord) -> Self {
        Self {
            user_id: worker.into(),
            title: "Task assigned".to_string(),
            message: format!("You have been selected for \"{}\".", task.title),
            kind: NotificationKind::Assigned,
        }
    }

    pub fn not_selected(worker: WorkerId, task: &TaskRecord) -> Self {
        Self {
            user_id: worker.into(),
            title: "Application not selected".to_string(),
            message: format!("Another worker was selected for \"{}\".", task.title),
            kind: NotificationKind::NotSelected,
        }
    }

    pub fn window_extended(client: UserId, task: &TaskRecord, timer: &AssignmentTimer) -> Self {
        Self {
            user_id: client,
            title: "Application window extended".to_string(),
            message: format!(
                "No one has applied to \"{}\" yet. The window now closes at {} ({} of {} extensions used).",
                task.title,
                timer.window_end.format("%Y-%m-%d %H:%M UTC"),
                timer.extensions_count,
                timer.max_extensions,
            ),
            kind: NotificationKind::WindowExtended,
        }
    }

    pub fn auto_assign_cancelled(client: UserId, task: &TaskRecord) -> Self {
        Self {
            user_id: client,
            title: "Auto-assignment stopped".to_string(),
            message: format!(
                "No applications arrived for \"{}\". The task is still open for manual assignment.",
                task.title
            ),
            kind: NotificationKind::AutoAssignCancelled,
        }
    }
}

/// Delivery sink owned by the host.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Drops every notification after logging it. For dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            user_id = %notification.user_id,
            kind = %notification.kind,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}
