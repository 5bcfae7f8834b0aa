//! Retry queue for notifications the sink refused.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, warn};

use super::{Notification, Notifier};
use crate::telemetry::metrics;

/// How long to wait before re-sending, and when to give up.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total delivery attempts, the first one included.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied per failed attempt.
    pub backoff_coefficient: u32,
    pub maximum_interval: Duration,
}

impl RetryPolicy {
    /// Delay after `attempts` failed deliveries.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let factor = self
            .backoff_coefficient
            .saturating_pow(attempts.saturating_sub(1));
        let candidate = self
            .initial_interval
            .checked_mul(i32::try_from(factor).unwrap_or(i32::MAX))
            .unwrap_or(self.maximum_interval);
        candidate.min(self.maximum_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::seconds(30),
            backoff_coefficient: 2,
            maximum_interval: Duration::minutes(30),
        }
    }
}

#[derive(Debug)]
struct Pending {
    notification: Notification,
    attempts: u32,
    next_attempt_at: DateTime<Utc>,
}

/// Counts from one pass over the retry queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

/// Front door to the [`Notifier`]: deliver now, or park and retry later.
pub struct NotificationOutbox {
    sink: Arc<dyn Notifier>,
    policy: RetryPolicy,
    pending: Mutex<VecDeque<Pending>>,
}

impl NotificationOutbox {
    pub fn new(sink: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Try once. A failure is logged and queued; returns whether it went out.
    pub async fn deliver(&self, notification: Notification, now: DateTime<Utc>) -> bool {
        match self.sink.notify(&notification).await {
            Ok(()) => {
                record(&notification, "delivered");
                true
            }
            Err(e) => {
                warn!(
                    user_id = %notification.user_id,
                    kind = %notification.kind,
                    error = %e,
                    "notification delivery failed, queued for retry"
                );
                self.park(notification, 1, now).await;
                false
            }
        }
    }

    /// Re-send every queued notification whose backoff has elapsed.
    pub async fn retry_due(&self, now: DateTime<Utc>) -> RetryReport {
        let due: Vec<Pending> = {
            let mut pending = self.pending.lock().await;
            let (due, waiting): (VecDeque<_>, VecDeque<_>) = pending
                .drain(..)
                .partition(|p| p.next_attempt_at <= now);
            *pending = waiting;
            due.into()
        };

        let mut report = RetryReport::default();
        for item in due {
            match self.sink.notify(&item.notification).await {
                Ok(()) => {
                    record(&item.notification, "delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    let attempts = item.attempts + 1;
                    if attempts >= self.policy.max_attempts {
                        error!(
                            user_id = %item.notification.user_id,
                            kind = %item.notification.kind,
                            attempts,
                            error = %e,
                            "notification dropped after exhausting retries"
                        );
                        record(&item.notification, "dropped");
                        report.dropped += 1;
                    } else {
                        warn!(
                            user_id = %item.notification.user_id,
                            attempts,
                            error = %e,
                            "notification retry failed"
                        );
                        self.park(item.notification, attempts, now).await;
                        report.requeued += 1;
                    }
                }
            }
        }
        report
    }

    /// Notifications waiting for a retry.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn park(&self, notification: Notification, attempts: u32, now: DateTime<Utc>) {
        if attempts >= self.policy.max_attempts {
            error!(
                user_id = %notification.user_id,
                kind = %notification.kind,
                attempts,
                "notification dropped, retries disabled"
            );
            record(&notification, "dropped");
            return;
        }
        record(&notification, "failed");
        self.pending.lock().await.push_back(Pending {
            notification,
            attempts,
            next_attempt_at: now + self.policy.delay_after(attempts),
        });
    }
}

fn record(notification: &Notification, result: &'static str) {
    metrics::notifications().add(
        1,
        &[
            KeyValue::new("kind", notification.kind.to_string()),
            KeyValue::new("result", result),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::model::UserId;
    use crate::notify::NotificationKind;
    use async_trait::async_trait;

    struct DeadSink;

    #[async_trait]
    impl Notifier for DeadSink {
        async fn notify(&self, _: &Notification) -> Result<()> {
            Err(Error::NotificationDeliveryFailed("sink down".into()))
        }
    }

    fn notification() -> Notification {
        Notification {
            user_id: UserId::new(),
            kind: NotificationKind::Assigned,
            title: "Task assigned".into(),
            message: "You got it".into(),
        }
    }

    #[tokio::test]
    async fn single_attempt_policy_drops_instead_of_queueing() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let outbox = NotificationOutbox::new(Arc::new(DeadSink), policy);
        let now = Utc::now();

        assert!(!outbox.deliver(notification(), now).await);
        assert_eq!(outbox.pending_len().await, 0);
        let report = outbox.retry_due(now + Duration::hours(1)).await;
        assert_eq!(report, RetryReport::default());
    }

    #[tokio::test]
    async fn exhausted_retries_are_dropped() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_interval: Duration::seconds(1),
            backoff_coefficient: 2,
            maximum_interval: Duration::seconds(1),
        };
        let outbox = NotificationOutbox::new(Arc::new(DeadSink), policy);
        let now = Utc::now();

        outbox.deliver(notification(), now).await;
        assert_eq!(outbox.pending_len().await, 1);
        let report = outbox.retry_due(now + Duration::seconds(1)).await;
        assert_eq!(report.dropped, 1);
        assert_eq!(outbox.pending_len().await, 0);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_interval: Duration::seconds(10),
            backoff_coefficient: 2,
            maximum_interval: Duration::seconds(60),
        };
        assert_eq!(policy.delay_after(1), Duration::seconds(10));
        assert_eq!(policy.delay_after(2), Duration::seconds(20));
        assert_eq!(policy.delay_after(3), Duration::seconds(40));
        assert_eq!(policy.delay_after(4), Duration::seconds(60));
        assert_eq!(policy.delay_after(40), Duration::seconds(60));
    }
}
