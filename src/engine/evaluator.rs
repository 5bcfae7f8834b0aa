//! Winner selection and the assignment commit.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{Instrument, error, info, warn};

use super::AssignmentEngine;
use crate::error::{Error, Result};
use crate::model::*;
use crate::notify::Notification;
use crate::scoring::{self, Score};
use crate::store::{AssignmentCommit, CommitOutcome};
use crate::telemetry::{assignment, metrics};

/// An application with its score, in `applied_at` order.
#[derive(Debug, Clone, Serialize)]
pub struct RankedApplication {
    pub worker_id: WorkerId,
    pub applied_at: DateTime<Utc>,
    pub score: Score,
}

/// What one evaluation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Assigned {
        winner: WorkerId,
        applicants: usize,
        /// True when the lone applicant was taken without scoring.
        unscored: bool,
    },
    NoApplications,
    /// The task was not open and auto-assignable when read or committed.
    NotEligible { status: TaskStatus, auto_assign: bool },
}

impl Evaluation {
    pub fn winner(&self) -> Option<WorkerId> {
        match self {
            Evaluation::Assigned { winner, .. } => Some(*winner),
            _ => None,
        }
    }
}

/// Score every application against the task. Applicants without a known
/// profile score as having no skills and no rating.
pub fn rank_applications(
    task: &TaskRecord,
    applications: &[Application],
    profiles: &HashMap<WorkerId, WorkerProfile>,
    now: DateTime<Utc>,
) -> Vec<RankedApplication> {
    let no_skills = BTreeSet::new();
    applications
        .iter()
        .map(|app| {
            let (skills, rating) = match profiles.get(&app.worker_id) {
                Some(p) => (&p.skills, p.rating),
                None => (&no_skills, None),
            };
            RankedApplication {
                worker_id: app.worker_id,
                applied_at: app.applied_at,
                score: scoring::score(skills, &task.required_skills, rating, app.applied_at, now),
            }
        })
        .collect()
}

/// Highest total wins; on a tie the earlier entry keeps its place.
pub fn select_winner(ranked: &[RankedApplication]) -> Option<&RankedApplication> {
    ranked.iter().fold(None, |best, candidate| match best {
        Some(b) if candidate.score.total <= b.score.total => Some(b),
        _ => Some(candidate),
    })
}

impl AssignmentEngine {
    /// Pick a winner for `task_id` and commit the assignment.
    ///
    /// Returns `None` when nothing was assigned: the task is not open with
    /// auto-assign on, or nobody applied. Calling it again on an assigned
    /// task is a no-op.
    pub async fn evaluate(&self, task_id: TaskId) -> Result<Option<WorkerId>> {
        let (evaluation, notifications) = {
            let _guard = self.locks.lock(task_id).await;
            self.evaluate_locked(task_id).await?
        };
        self.send_all(notifications).await;
        Ok(evaluation.winner())
    }

    /// Evaluate with the task lock already held. Notifications are returned
    /// rather than sent so the caller can release the lock first.
    pub(super) async fn evaluate_locked(
        &self,
        task_id: TaskId,
    ) -> Result<(Evaluation, Vec<Notification>)> {
        let span = assignment::start_evaluate_span(task_id);
        async {
            let now = self.clock.now();
            let task = self.store.task(task_id).await?;
            if !task.is_auto_assignable() {
                assignment::record_outcome(&span, 0, "not_eligible");
                return Ok((
                    Evaluation::NotEligible {
                        status: task.status,
                        auto_assign: task.auto_assign,
                    },
                    Vec::new(),
                ));
            }

            let applications = self.store.applications(task_id).await?;
            let (winner, unscored) = match applications.as_slice() {
                [] => {
                    assignment::record_outcome(&span, 0, "no_applications");
                    return Ok((Evaluation::NoApplications, Vec::new()));
                }
                [only] => (only.worker_id, true),
                _ => {
                    self.store.begin_review(task_id, now).await?;
                    (self.pick_scored(&task, &applications, now).await?, false)
                }
            };

            let commit = AssignmentCommit {
                task_id,
                winner,
                expected_applications: u32::try_from(applications.len()).unwrap_or(u32::MAX),
                now,
            };
            let outcome = self.store.commit_assignment(commit).await.inspect_err(|e| {
                if matches!(e, Error::InvariantViolation { .. }) {
                    error!(task_id = %task_id, error = %e, "invariant violation during assignment commit");
                } else {
                    warn!(task_id = %task_id, error = %e, "assignment commit failed, will retry");
                }
            })?;

            match outcome {
                CommitOutcome::Committed { winner, losers, .. } => {
                    assignment::record_outcome(&span, applications.len(), "assigned");
                    metrics::tasks_assigned().add(
                        1,
                        &[KeyValue::new("path", if unscored { "single" } else { "scored" })],
                    );
                    info!(
                        task_id = %task_id,
                        winner = %winner,
                        applicants = applications.len(),
                        "task assigned"
                    );

                    let mut notifications = Vec::with_capacity(losers.len() + 1);
                    notifications.push(Notification::assigned(winner, &task));
                    notifications.extend(losers.iter().map(|w| Notification::not_selected(*w, &task)));

                    Ok((
                        Evaluation::Assigned {
                            winner,
                            applicants: applications.len(),
                            unscored,
                        },
                        notifications,
                    ))
                }
                CommitOutcome::Stale {
                    status,
                    auto_assign,
                } => {
                    assignment::record_outcome(&span, applications.len(), "stale");
                    info!(task_id = %task_id, %status, auto_assign, "task changed before commit");
                    Ok((
                        Evaluation::NotEligible {
                            status,
                            auto_assign,
                        },
                        Vec::new(),
                    ))
                }
            }
        }
        .instrument(span.clone())
        .await
    }

    async fn pick_scored(
        &self,
        task: &TaskRecord,
        applications: &[Application],
        now: DateTime<Utc>,
    ) -> Result<WorkerId> {
        let ids: Vec<WorkerId> = applications.iter().map(|a| a.worker_id).collect();
        let profiles: HashMap<_, _> = self
            .store
            .workers(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        for missing in ids.iter().filter(|id| !profiles.contains_key(id)) {
            warn!(task_id = %task.id, worker_id = %missing, "no profile for applicant, scoring as zero");
        }

        let ranked = rank_applications(task, applications, &profiles, now);
        let best = select_winner(&ranked).ok_or_else(|| Error::InvariantViolation {
            task_id: task.id,
            detail: "no ranked applications to choose from".to_string(),
        })?;
        tracing::debug!(
            task_id = %task.id,
            winner = %best.worker_id,
            total = best.score.total,
            "winner selected"
        );
        Ok(best.worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ranked(total: f64, offset_secs: i64) -> RankedApplication {
        RankedApplication {
            worker_id: WorkerId::new(),
            applied_at: Utc::now() + Duration::seconds(offset_secs),
            score: Score {
                skill_score: 1.0,
                rating_score: total,
                time_bonus: 0.0,
                total,
            },
        }
    }

    #[test]
    fn highest_total_wins() {
        let list = vec![ranked(1.0, 0), ranked(3.0, 1), ranked(2.0, 2)];
        assert_eq!(select_winner(&list).unwrap().worker_id, list[1].worker_id);
    }

    #[test]
    fn tie_goes_to_first_seen() {
        let list = vec![ranked(2.0, 0), ranked(2.0, 1), ranked(1.0, 2)];
        assert_eq!(select_winner(&list).unwrap().worker_id, list[0].worker_id);
    }

    #[test]
    fn empty_list_has_no_winner() {
        assert!(select_winner(&[]).is_none());
    }

    #[test]
    fn missing_profile_scores_only_time_bonus() {
        let now = Utc::now();
        let task = TaskRecord::new("t", 60).required_skills(["rust"]);
        let app = Application {
            id: ApplicationId::new(),
            task_id: task.id,
            worker_id: WorkerId::new(),
            bucket_id: BucketId::new(),
            applied_at: now,
            selection: Selection::Pending,
        };
        let ranked = rank_applications(&task, &[app], &HashMap::new(), now);
        assert_eq!(ranked[0].score.skill_score, 0.0);
        assert_eq!(ranked[0].score.rating_score, 0.0);
        assert!((ranked[0].score.total - scoring::MAX_TIME_BONUS).abs() < 1e-12);
    }
}
