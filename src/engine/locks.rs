//! Per-task mutual exclusion.
//!
//! Every engine operation on a task holds that task's lock, so an
//! application racing window expiry is either counted before the evaluator
//! reads the bucket or lands after the decision. Different tasks never
//! contend.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::TaskId;

/// Entries are weak, so a task's lock lives only while someone holds or
/// awaits it.
#[derive(Default)]
pub(crate) struct TaskLocks {
    locks: DashMap<TaskId, Weak<AsyncMutex<()>>>,
}

impl TaskLocks {
    pub(crate) async fn lock(&self, task_id: TaskId) -> OwnedMutexGuard<()> {
        self.get_or_create(task_id).lock_owned().await
    }

    fn get_or_create(&self, task_id: TaskId) -> Arc<AsyncMutex<()>> {
        // Fast path: someone already holds or awaits this task's lock
        let existing = self.locks.get(&task_id).and_then(|weak| weak.upgrade());
        if let Some(mutex) = existing {
            return mutex;
        }

        // The entry guard keeps the shard locked, so two callers racing on
        // the same task end up sharing one mutex.
        let mutex = {
            let mut entry = self.locks.entry(task_id).or_default();
            match entry.upgrade() {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(AsyncMutex::new(()));
                    *entry = Arc::downgrade(&mutex);
                    mutex
                }
            }
        };
        self.locks.retain(|_, weak| weak.strong_count() > 0);
        mutex
    }

    #[cfg(test)]
    fn live(&self) -> usize {
        self.locks
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    #[cfg(test)]
    fn entries(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_task_is_serialized() {
        let locks = TaskLocks::default();
        let task = TaskId::new();

        let guard = locks.lock(task).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(task)).await;
        assert!(second.is_err(), "second lock on the same task must wait");

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.lock(task)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn different_tasks_do_not_contend() {
        let locks = TaskLocks::default();
        let _a = locks.lock(TaskId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(TaskId::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let locks = TaskLocks::default();
        drop(locks.lock(TaskId::new()).await);
        assert_eq!(locks.live(), 0);

        // The next creation prunes the dead entry.
        let _held = locks.lock(TaskId::new()).await;
        assert_eq!(locks.entries(), 1);
        assert_eq!(locks.live(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_callers_share_one_mutex() {
        let locks = Arc::new(TaskLocks::default());
        let task = TaskId::new();
        let guard = locks.lock(task).await;

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            waiters.push(tokio::spawn(async move {
                drop(locks.lock(task).await);
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));
        assert_eq!(locks.entries(), 1);

        drop(guard);
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(locks.live(), 0);
    }
}
