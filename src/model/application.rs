//! Applications and the per-task bucket that aggregates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::uuid_id;
use super::{TaskId, WorkerId};
use crate::error::{Error, Result};

uuid_id!(ApplicationId);
uuid_id!(BucketId);

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Outcome of an application. Only the evaluator moves it off `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Pending,
    Selected,
    Rejected,
}

impl Selection {
    /// Stored as a nullable boolean: NULL pending, true selected, false rejected.
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Selection::Pending => None,
            Selection::Selected => Some(true),
            Selection::Rejected => Some(false),
        }
    }
}

impl From<Option<bool>> for Selection {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            None => Selection::Pending,
            Some(true) => Selection::Selected,
            Some(false) => Selection::Rejected,
        }
    }
}

/// One worker's interest in one task. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub bucket_id: BucketId,
    pub applied_at: DateTime<Utc>,
    pub selection: Selection,
}

/// An application as submitted, before it has a bucket.
#[derive(Debug, Clone, Copy)]
pub struct NewApplication {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub applied_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
    /// Collecting applications.
    Open,
    /// The evaluator is ranking; applications are still counted.
    Reviewing,
    /// A decision was committed. Terminal.
    Closed,
}

impl BucketStatus {
    pub fn can_transition_to(self, to: BucketStatus) -> bool {
        use BucketStatus::*;
        matches!(
            (self, to),
            (Open, Reviewing) | (Open, Closed) | (Reviewing, Closed)
        )
    }

    pub fn accepts_applications(self) -> bool {
        !matches!(self, BucketStatus::Closed)
    }
}

impl std::fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BucketStatus::Open => "open",
            BucketStatus::Reviewing => "reviewing",
            BucketStatus::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BucketStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(BucketStatus::Open),
            "reviewing" => Ok(BucketStatus::Reviewing),
            "closed" => Ok(BucketStatus::Closed),
            other => Err(Error::Other(format!("unknown bucket status: {other}"))),
        }
    }
}

/// Aggregate of every application received for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationBucket {
    pub id: BucketId,
    pub task_id: TaskId,
    pub total_applications: u32,
    pub reviewed_applications: u32,
    pub approved_applications: u32,
    pub rejected_applications: u32,
    pub status: BucketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationBucket {
    pub fn new(task_id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            id: BucketId::new(),
            task_id,
            total_applications: 0,
            reviewed_applications: 0,
            approved_applications: 0,
            rejected_applications: 0,
            status: BucketStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Count one more application. Fails once the bucket is closed.
    pub(crate) fn record(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.status.accepts_applications() {
            return Err(Error::BucketAlreadyClosed(self.task_id));
        }
        self.total_applications += 1;
        self.updated_at = now;
        Ok(())
    }

    /// `open -> reviewing`. Returns false if the bucket was not open.
    pub(crate) fn begin_review(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.can_transition_to(BucketStatus::Reviewing) {
            self.status = BucketStatus::Reviewing;
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    pub(crate) fn close(&mut self, outcome: BucketOutcome, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(BucketStatus::Closed) {
            return Err(Error::BucketAlreadyClosed(self.task_id));
        }
        self.status = BucketStatus::Closed;
        self.reviewed_applications = outcome.reviewed;
        self.approved_applications = outcome.approved;
        self.rejected_applications = outcome.rejected;
        self.updated_at = now;
        Ok(())
    }
}

/// Final counters written when a bucket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOutcome {
    pub reviewed: u32,
    pub approved: u32,
    pub rejected: u32,
}

impl BucketOutcome {
    /// One approved application, everything else rejected.
    pub fn single_winner(total: u32) -> Self {
        Self {
            reviewed: total,
            approved: total.min(1),
            rejected: total.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_bucket_rejects_applications() {
        let now = Utc::now();
        let mut bucket = ApplicationBucket::new(TaskId::new(), now);
        bucket.record(now).unwrap();
        bucket.close(BucketOutcome::single_winner(1), now).unwrap();

        assert!(matches!(
            bucket.record(now),
            Err(Error::BucketAlreadyClosed(_))
        ));
        assert_eq!(bucket.total_applications, 1);
    }

    #[test]
    fn close_is_not_repeatable() {
        let now = Utc::now();
        let mut bucket = ApplicationBucket::new(TaskId::new(), now);
        bucket.close(BucketOutcome::single_winner(0), now).unwrap();
        assert!(bucket.close(BucketOutcome::single_winner(0), now).is_err());
    }

    #[test]
    fn reviewing_still_counts_applications() {
        let now = Utc::now();
        let mut bucket = ApplicationBucket::new(TaskId::new(), now);
        assert!(bucket.begin_review(now));
        assert!(!bucket.begin_review(now));
        bucket.record(now).unwrap();
        assert_eq!(bucket.total_applications, 1);
        assert_eq!(bucket.status, BucketStatus::Reviewing);
    }

    #[test]
    fn single_winner_outcome_counts() {
        assert_eq!(
            BucketOutcome::single_winner(4),
            BucketOutcome {
                reviewed: 4,
                approved: 1,
                rejected: 3
            }
        );
        assert_eq!(BucketOutcome::single_winner(0).approved, 0);
    }

    #[test]
    fn selection_flag_round_trip() {
        for s in [Selection::Pending, Selection::Selected, Selection::Rejected] {
            assert_eq!(Selection::from(s.as_flag()), s);
        }
    }
}
