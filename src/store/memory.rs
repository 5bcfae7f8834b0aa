//! In-process store.
//!
//! One async mutex guards every map, so each trait method is a critical
//! section and therefore atomic. Composite operations validate everything
//! before their first write, so an error never leaves a half-applied change.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{AssignmentCommit, AssignmentStore, CommitOutcome};
use crate::error::{Error, Result};
use crate::model::*;

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, TaskRecord>,
    workers: HashMap<WorkerId, WorkerProfile>,
    /// Insertion order; sorted by `applied_at` on read.
    applications: HashMap<TaskId, Vec<Application>>,
    buckets: HashMap<TaskId, ApplicationBucket>,
    timers: HashMap<TaskId, AssignmentTimer>,
}

impl State {
    fn task(&self, id: TaskId) -> Result<&TaskRecord> {
        self.tasks.get(&id).ok_or(Error::TaskNotFound(id))
    }

    fn timer_mut(&mut self, task_id: TaskId) -> Result<&mut AssignmentTimer> {
        self.timers
            .get_mut(&task_id)
            .ok_or(Error::TimerNotFound(task_id))
    }

    fn close_bucket(
        &mut self,
        task_id: TaskId,
        outcome: BucketOutcome,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        let bucket = self
            .buckets
            .get_mut(&task_id)
            .ok_or(Error::BucketNotFound(task_id))?;
        bucket.close(outcome, now)?;
        Ok(bucket.clone())
    }
}

/// Store backed by in-process maps. Also holds the task and worker records a
/// host would normally own, seeded through [`MemoryStore::put_task`] and
/// [`MemoryStore::put_worker`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task, as the host's task service would.
    pub async fn put_task(&self, task: TaskRecord) {
        self.state.lock().await.tasks.insert(task.id, task);
    }

    pub async fn put_worker(&self, worker: WorkerProfile) {
        self.state.lock().await.workers.insert(worker.id, worker);
    }

    /// Delete a task record. Timers and applications are left behind.
    pub async fn remove_task(&self, id: TaskId) -> Option<TaskRecord> {
        self.state.lock().await.tasks.remove(&id)
    }

    /// Edit a task in place, as an external collaborator would.
    pub async fn update_task<F>(&self, id: TaskId, f: F) -> Result<TaskRecord>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut state = self.state.lock().await;
        let task = state.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        f(task);
        Ok(task.clone())
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn task(&self, id: TaskId) -> Result<TaskRecord> {
        self.state.lock().await.task(id).cloned()
    }

    async fn worker(&self, id: WorkerId) -> Result<WorkerProfile> {
        self.state
            .lock()
            .await
            .workers
            .get(&id)
            .cloned()
            .ok_or(Error::WorkerNotFound(id))
    }

    async fn record_application(
        &self,
        new: NewApplication,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        let mut state = self.state.lock().await;

        let task = state.task(new.task_id)?;
        if !task.is_auto_assignable() {
            return Err(Error::NotAcceptingApplications {
                task_id: new.task_id,
                reason: format!("task is {} (auto_assign={})", task.status, task.auto_assign),
            });
        }

        let duplicate = state
            .applications
            .get(&new.task_id)
            .is_some_and(|apps| apps.iter().any(|a| a.worker_id == new.worker_id));
        if duplicate {
            return Err(Error::DuplicateApplication {
                task_id: new.task_id,
                worker_id: new.worker_id,
            });
        }

        let bucket = state
            .buckets
            .entry(new.task_id)
            .or_insert_with(|| ApplicationBucket::new(new.task_id, now));
        bucket.record(now)?;
        let bucket = bucket.clone();

        state
            .applications
            .entry(new.task_id)
            .or_default()
            .push(Application {
                id: ApplicationId::new(),
                task_id: new.task_id,
                worker_id: new.worker_id,
                bucket_id: bucket.id,
                applied_at: new.applied_at,
                selection: Selection::Pending,
            });

        Ok(bucket)
    }

    async fn applications(&self, task_id: TaskId) -> Result<Vec<Application>> {
        let state = self.state.lock().await;
        let mut apps = state
            .applications
            .get(&task_id)
            .cloned()
            .unwrap_or_default();
        // Stable: equal timestamps keep arrival order.
        apps.sort_by_key(|a| a.applied_at);
        Ok(apps)
    }

    async fn bucket(&self, task_id: TaskId) -> Result<Option<ApplicationBucket>> {
        Ok(self.state.lock().await.buckets.get(&task_id).cloned())
    }

    async fn begin_review(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let bucket = state
            .buckets
            .get_mut(&task_id)
            .ok_or(Error::BucketNotFound(task_id))?;
        bucket.begin_review(now);
        Ok(())
    }

    async fn close_bucket(
        &self,
        task_id: TaskId,
        outcome: BucketOutcome,
        now: DateTime<Utc>,
    ) -> Result<ApplicationBucket> {
        self.state.lock().await.close_bucket(task_id, outcome, now)
    }

    async fn start_timer(
        &self,
        task_id: TaskId,
        window_minutes: u32,
        max_extensions: u32,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer> {
        let mut state = self.state.lock().await;
        state.task(task_id)?;
        if state
            .timers
            .get(&task_id)
            .is_some_and(|t| t.status == TimerStatus::Active)
        {
            return Err(Error::TimerAlreadyActive(task_id));
        }
        let timer = AssignmentTimer::new(task_id, window_minutes, max_extensions, now)?;
        state.timers.insert(task_id, timer.clone());
        Ok(timer)
    }

    async fn timer(&self, task_id: TaskId) -> Result<Option<AssignmentTimer>> {
        Ok(self.state.lock().await.timers.get(&task_id).cloned())
    }

    async fn due_timers(&self, now: DateTime<Utc>) -> Result<Vec<AssignmentTimer>> {
        let state = self.state.lock().await;
        let mut due: Vec<_> = state
            .timers
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.window_end, t.task_id));
        Ok(due)
    }

    async fn extend_timer(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Extension> {
        let mut state = self.state.lock().await;
        state.timer_mut(task_id)?.extend(now)
    }

    async fn finish_timer(
        &self,
        task_id: TaskId,
        to: TimerStatus,
        now: DateTime<Utc>,
    ) -> Result<AssignmentTimer> {
        let mut state = self.state.lock().await;
        let timer = state.timer_mut(task_id)?;
        timer.finish(to, now)?;
        Ok(timer.clone())
    }

    async fn commit_assignment(&self, commit: AssignmentCommit) -> Result<CommitOutcome> {
        let mut state = self.state.lock().await;
        let task_id = commit.task_id;

        // --- Validate ---
        let task = state.task(task_id)?;
        if !task.is_auto_assignable() {
            return Ok(CommitOutcome::Stale {
                status: task.status,
                auto_assign: task.auto_assign,
            });
        }

        let bucket = state.buckets.get(&task_id).ok_or_else(|| {
            Error::InvariantViolation {
                task_id,
                detail: "committing an assignment without an application bucket".to_string(),
            }
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

        let applied = state
            .applications
            .get(&task_id)
            .is_some_and(|apps| apps.iter().any(|a| a.worker_id == commit.winner));
        if !applied {
            return Err(Error::InvariantViolation {
                task_id,
                detail: format!("winner {} never applied", commit.winner),
            });
        }

        // --- Apply ---
        let mut losers = Vec::new();
        if let Some(apps) = state.applications.get_mut(&task_id) {
            for app in apps.iter_mut() {
                if app.worker_id == commit.winner {
                    app.selection = Selection::Selected;
                } else {
                    app.selection = Selection::Rejected;
                    losers.push(app.worker_id);
                }
            }
        }

        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.assignee_id = Some(commit.winner);
            task.status = TaskStatus::Assigned;
        }

        let outcome = BucketOutcome::single_winner(commit.expected_applications);
        let bucket = state.close_bucket(task_id, outcome, commit.now)?;

        if let Some(timer) = state.timers.get_mut(&task_id) {
            timer.finish(TimerStatus::Completed, commit.now)?;
        }

        Ok(CommitOutcome::Committed {
            winner: commit.winner,
            losers,
            bucket,
        })
    }

    async fn abandon_auto_assign(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentTimer>> {
        let mut state = self.state.lock().await;
        state.task(task_id)?;
        let timer = match state.timers.get_mut(&task_id) {
            Some(timer) => {
                timer.finish(TimerStatus::Cancelled, now)?;
                Some(timer.clone())
            }
            None => None,
        };
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.auto_assign = false;
        }
        Ok(timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_application() -> (MemoryStore, TaskId, DateTime<Utc>) {
        let store = MemoryStore::new();
        let task = TaskRecord::new("Index logs", 60);
        let id = task.id;
        store.put_task(task).await;
        let now = Utc::now();
        let new = NewApplication {
            task_id: id,
            worker_id: WorkerId::new(),
            applied_at: now,
        };
        store.record_application(new, now).await.unwrap();
        (store, id, now)
    }

    #[tokio::test]
    async fn closing_a_bucket_twice_fails() {
        let (store, task, now) = store_with_application().await;

        let closed = store
            .close_bucket(task, BucketOutcome::single_winner(1), now)
            .await
            .unwrap();
        assert_eq!(closed.status, BucketStatus::Closed);
        assert_eq!(closed.approved_applications, 1);

        let err = store
            .close_bucket(task, BucketOutcome::single_winner(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BucketAlreadyClosed(id) if id == task));
    }

    #[tokio::test]
    async fn commit_refuses_an_already_closed_bucket() {
        let (store, task, now) = store_with_application().await;
        let winner = store.applications(task).await.unwrap()[0].worker_id;
        store
            .close_bucket(task, BucketOutcome::single_winner(1), now)
            .await
            .unwrap();

        let err = store
            .commit_assignment(AssignmentCommit {
                task_id: task,
                winner,
                expected_applications: 1,
                now,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { .. }));
        assert_eq!(store.task(task).await.unwrap().status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn abandon_without_a_timer_still_clears_the_flag() {
        let (store, task, now) = store_with_application().await;
        assert!(store.abandon_auto_assign(task, now).await.unwrap().is_none());
        assert!(!store.task(task).await.unwrap().auto_assign);
    }
}
