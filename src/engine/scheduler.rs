//! Drives [`AssignmentEngine::sweep_once`] on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::AssignmentEngine;

/// The sweep loop: wake every `interval`, run one pass, repeat until shutdown.
pub struct Scheduler {
    engine: Arc<AssignmentEngine>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Scheduler {
    pub fn new(engine: Arc<AssignmentEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop. A pass already running finishes first.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until [`Scheduler::shutdown`] is called.
    ///
    /// The first pass runs immediately. A pass that outlasts the interval
    /// delays the next tick rather than queueing a burst of catch-up passes.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "sweep scheduler started");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("sweep scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.engine.sweep_once().await {
                Ok(report) if report.due == 0 && report.notifications.delivered == 0 => {
                    debug!("sweep found nothing due");
                }
                Ok(report) => {
                    debug!(
                        retried = report.notifications.delivered,
                        requeued = report.notifications.requeued,
                        dropped = report.notifications.dropped,
                        "notification retries"
                    );
                }
                Err(e) => error!("sweep error: {e}"),
            }
        }
    }
}
