//! Integration tests for telemetry initialization and span helpers.

use std::io;
use std::sync::{Arc, Mutex};

use auto_assign::model::TaskId;
use auto_assign::telemetry::{TelemetryConfig, assignment, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so this may
    // return Err if another test got there first; that is acceptable.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "assignd-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = init_telemetry(config);
}

/// Formatted log output shared with the subscriber under test.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a local fmt subscriber and return what it logged.
fn capture(f: impl FnOnce()) -> String {
    let out = Captured::default();
    let writer = out.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    out.text()
}

#[test]
fn timer_transition_is_logged_inside_the_evaluate_span() {
    let task = TaskId::new();
    let logged = capture(|| {
        let span = assignment::start_evaluate_span(task);
        assignment::record_outcome(&span, 2, "assigned");
        assignment::record_timer_transition(&span, task, "active", "completed");
    });

    let line = logged
        .lines()
        .find(|l| l.contains("timer_transition"))
        .expect("transition event logged");
    assert!(line.contains("assignment.evaluate"), "{line}");
    assert!(line.contains(&task.to_string()), "{line}");
    assert!(line.contains("active"), "{line}");
    assert!(line.contains("completed"), "{line}");
    assert!(line.contains("assignment.outcome"), "{line}");
}

#[test]
fn sweep_span_carries_recorded_counts() {
    let logged = capture(|| {
        let span = assignment::start_sweep_span();
        span.record("sweep.due", 3_u64);
        span.record("sweep.assigned", 1_u64);
        span.in_scope(|| tracing::info!("sweep finished"));
    });

    let line = logged
        .lines()
        .find(|l| l.contains("sweep finished"))
        .expect("event logged");
    assert!(line.contains("assignment.sweep"), "{line}");
    assert!(line.contains("sweep.due=3"), "{line}");
    assert!(line.contains("sweep.assigned=1"), "{line}");
}
