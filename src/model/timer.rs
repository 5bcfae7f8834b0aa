//! Per-task application window with extension bookkeeping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use crate::error::{Error, Result};

/// Default number of times an empty window may be extended.
pub const DEFAULT_MAX_EXTENSIONS: u32 = 5;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    /// Window open (possibly extended).
    Active,
    /// A winner was assigned. Terminal.
    Completed,
    /// Extensions exhausted or auto-assign switched off. Terminal.
    Cancelled,
}

impl TimerStatus {
    pub fn can_transition_to(self, to: TimerStatus) -> bool {
        use TimerStatus::*;
        matches!(
            (self, to),
            (Active, Active) | (Active, Completed) | (Active, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TimerStatus::Completed | TimerStatus::Cancelled)
    }
}

impl std::fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimerStatus::Active => "active",
            TimerStatus::Completed => "completed",
            TimerStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TimerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(TimerStatus::Active),
            "completed" => Ok(TimerStatus::Completed),
            "cancelled" => Ok(TimerStatus::Cancelled),
            other => Err(Error::Other(format!("unknown timer status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentTimer {
    pub task_id: TaskId,
    pub application_window_minutes: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub extensions_count: u32,
    pub max_extensions: u32,
    pub status: TimerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of asking for one more window.
#[derive(Debug, Clone)]
pub enum Extension {
    /// The window moved forward by one application window.
    Extended(AssignmentTimer),
    /// The budget is used up; nothing changed. The caller cancels.
    Exhausted(AssignmentTimer),
    /// The window has not ended, e.g. another sweeper extended it first.
    /// Nothing changed.
    NotDue(AssignmentTimer),
}

impl AssignmentTimer {
    pub fn new(
        task_id: TaskId,
        window_minutes: u32,
        max_extensions: u32,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if window_minutes == 0 {
            return Err(Error::InvalidWindow(0));
        }
        Ok(Self {
            task_id,
            application_window_minutes: window_minutes,
            window_start: now,
            window_end: now + Self::window(window_minutes),
            extensions_count: 0,
            max_extensions,
            status: TimerStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    fn window(minutes: u32) -> Duration {
        Duration::minutes(i64::from(minutes))
    }

    /// Active with its window already elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TimerStatus::Active && self.window_end <= now
    }

    pub fn extensions_remaining(&self) -> u32 {
        self.max_extensions.saturating_sub(self.extensions_count)
    }

    /// Time left in the window, zero once elapsed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.window_end - now).max(Duration::zero())
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.status == TimerStatus::Active {
            Ok(())
        } else {
            Err(Error::TimerNotActive {
                task_id: self.task_id,
                status: self.status,
            })
        }
    }

    /// Push the window out by one application window, within budget.
    /// Only an elapsed window is extended.
    pub(crate) fn extend(&mut self, now: DateTime<Utc>) -> Result<Extension> {
        self.ensure_active()?;
        if self.window_end > now {
            return Ok(Extension::NotDue(self.clone()));
        }
        if self.extensions_count >= self.max_extensions {
            return Ok(Extension::Exhausted(self.clone()));
        }
        self.window_end += Self::window(self.application_window_minutes);
        self.extensions_count += 1;
        self.updated_at = now;
        Ok(Extension::Extended(self.clone()))
    }

    /// Move to a terminal state. Returns false when already terminal.
    pub(crate) fn finish(&mut self, to: TimerStatus, now: DateTime<Utc>) -> Result<bool> {
        if !to.is_terminal() {
            return Err(Error::Other(format!("{to} is not a terminal timer state")));
        }
        if self.status.is_terminal() {
            return Ok(false);
        }
        self.status = to;
        self.updated_at = now;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(max_extensions: u32) -> (AssignmentTimer, DateTime<Utc>) {
        let now = Utc::now();
        (
            AssignmentTimer::new(TaskId::new(), 60, max_extensions, now).unwrap(),
            now,
        )
    }

    #[test]
    fn window_end_is_start_plus_window() {
        let (t, now) = timer(5);
        assert_eq!(t.window_start, now);
        assert_eq!(t.window_end - t.window_start, Duration::minutes(60));
        assert!(!t.is_due(now));
        assert!(t.is_due(now + Duration::minutes(60)));
    }

    #[test]
    fn zero_minute_window_is_rejected() {
        let err = AssignmentTimer::new(TaskId::new(), 0, 5, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidWindow(0)));
    }

    #[test]
    fn extension_budget_is_bounded() {
        let (mut t, _) = timer(2);
        let original_end = t.window_end;

        assert!(matches!(t.extend(t.window_end).unwrap(), Extension::Extended(_)));
        assert!(matches!(t.extend(t.window_end).unwrap(), Extension::Extended(_)));
        assert!(matches!(t.extend(t.window_end).unwrap(), Extension::Exhausted(_)));

        assert_eq!(t.extensions_count, 2);
        assert_eq!(t.window_end, original_end + Duration::minutes(120));
        assert_eq!(t.extensions_remaining(), 0);
    }

    #[test]
    fn open_window_is_not_extended() {
        let (mut t, now) = timer(5);
        let end = t.window_end;
        assert!(matches!(t.extend(now).unwrap(), Extension::NotDue(_)));

        // A second extension at the same instant finds the moved window.
        assert!(matches!(t.extend(end).unwrap(), Extension::Extended(_)));
        assert!(matches!(t.extend(end).unwrap(), Extension::NotDue(_)));
        assert_eq!(t.extensions_count, 1);
    }

    #[test]
    fn terminal_transitions_are_idempotent() {
        let (mut t, now) = timer(5);
        assert!(t.finish(TimerStatus::Cancelled, now).unwrap());
        assert!(!t.finish(TimerStatus::Cancelled, now).unwrap());
        assert!(!t.finish(TimerStatus::Completed, now).unwrap());
        assert_eq!(t.status, TimerStatus::Cancelled);
    }

    #[test]
    fn terminal_timer_cannot_extend() {
        let (mut t, now) = timer(5);
        t.finish(TimerStatus::Completed, now).unwrap();
        assert!(matches!(
            t.extend(now),
            Err(Error::TimerNotActive {
                status: TimerStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn terminal_timer_is_never_due() {
        let (mut t, now) = timer(5);
        t.finish(TimerStatus::Completed, now).unwrap();
        assert!(!t.is_due(now + Duration::days(1)));
        assert!(TimerStatus::Completed.is_terminal());
        assert!(!TimerStatus::Completed.can_transition_to(TimerStatus::Active));
    }
}
