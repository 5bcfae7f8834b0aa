//! assignd: operator interface to the auto-assignment engine.

use std::path::PathBuf;
use std::sync::Arc;

use auto_assign::config::Config;
use auto_assign::db::Db;
use auto_assign::engine::{AssignmentEngine, Scheduler, TaskSnapshot};
use auto_assign::model::{TaskId, WorkerId};
use auto_assign::notify::Notifier;
use auto_assign::store::AssignmentStore;
use auto_assign::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "assignd", about = "Auto-assignment engine for task marketplaces")]
struct Cli {
    /// TOML file with an [engine] table; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sweep loop until Ctrl-C
    Serve,
    /// Run one sweep pass now and print the summary
    Sweep,
    /// Start the application window for a task
    Open {
        task: TaskId,
        /// Window length in minutes (defaults to the task's own setting)
        #[arg(long)]
        window: Option<u32>,
    },
    /// Cancel a task's window without evaluating
    Disable { task: TaskId },
    /// Record an application from a worker
    Apply { task: TaskId, worker: WorkerId },
    /// Evaluate a task now, regardless of its window
    Evaluate { task: TaskId },
    /// Show a task's timer, bucket, and applications
    Show {
        task: TaskId,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "assignd".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let store: Arc<dyn AssignmentStore> = db.clone();
    let notifier: Arc<dyn Notifier> = db;
    let engine = Arc::new(AssignmentEngine::new(store, notifier, config.engine.clone()));

    match cli.command {
        Command::Serve => cmd_serve(engine).await,
        Command::Sweep => cmd_sweep(&engine).await,
        Command::Open { task, window } => cmd_open(&engine, task, window).await,
        Command::Disable { task } => cmd_disable(&engine, task).await,
        Command::Apply { task, worker } => cmd_apply(&engine, task, worker).await,
        Command::Evaluate { task } => cmd_evaluate(&engine, task).await,
        Command::Show { task, json } => cmd_show(&engine, task, json).await,
    }
}

async fn cmd_serve(engine: Arc<AssignmentEngine>) -> anyhow::Result<()> {
    let interval = engine.config().sweep_interval();
    let scheduler = Scheduler::new(engine, interval);

    let sched = scheduler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sched.shutdown();
    });

    scheduler.run().await;
    Ok(())
}

async fn cmd_sweep(engine: &AssignmentEngine) -> anyhow::Result<()> {
    let report = engine.sweep_once().await?;
    print!("{report}");
    let retries = report.notifications;
    if retries.delivered + retries.requeued + retries.dropped > 0 {
        println!(
            "notifications: {} retried, {} requeued, {} dropped",
            retries.delivered, retries.requeued, retries.dropped
        );
    }
    Ok(())
}

async fn cmd_open(engine: &AssignmentEngine, task: TaskId, window: Option<u32>) -> anyhow::Result<()> {
    let record = engine.store().task(task).await?;
    let window = window
        .or(Some(record.application_window_minutes).filter(|m| *m > 0))
        .unwrap_or(engine.config().default_window_minutes);

    match engine.on_task_opened(task, record.auto_assign, window).await? {
        Some(timer) => println!(
            "Window open: {task} closes at {} ({} min, up to {} extensions)",
            timer.window_end.format("%Y-%m-%d %H:%M:%S UTC"),
            timer.application_window_minutes,
            timer.max_extensions
        ),
        None => println!("Task {task} has auto-assign off; no window started."),
    }
    Ok(())
}

async fn cmd_disable(engine: &AssignmentEngine, task: TaskId) -> anyhow::Result<()> {
    match engine.on_auto_assign_disabled(task).await? {
        Some(timer) => println!("Timer for {task} is {}", timer.status),
        None => println!("Auto-assign off for {task}; it had no timer."),
    }
    Ok(())
}

async fn cmd_apply(engine: &AssignmentEngine, task: TaskId, worker: WorkerId) -> anyhow::Result<()> {
    let bucket = engine.submit_application(task, worker, engine.now()).await?;
    println!(
        "Applied: {worker} -> {task} ({} application(s), bucket {})",
        bucket.total_applications, bucket.status
    );
    Ok(())
}

async fn cmd_evaluate(engine: &AssignmentEngine, task: TaskId) -> anyhow::Result<()> {
    match engine.evaluate(task).await? {
        Some(winner) => println!("Assigned: {task} -> {winner}"),
        None => println!("Nothing assigned for {task}."),
    }
    Ok(())
}

async fn cmd_show(engine: &AssignmentEngine, task: TaskId, json: bool) -> anyhow::Result<()> {
    let snapshot = engine.inspect(task).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    print_snapshot(&snapshot, engine.now());
    Ok(())
}

fn print_snapshot(snapshot: &TaskSnapshot, now: chrono::DateTime<chrono::Utc>) {
    let task = &snapshot.task;
    println!("ID:          {}", task.id);
    println!("Title:       {}", task.title);
    println!("Status:      {}", task.status);
    println!("Auto-assign: {}", task.auto_assign);
    println!(
        "Assignee:    {}",
        task.assignee_id
            .map(|w| w.to_string())
            .unwrap_or("-".to_string())
    );
    let skills: Vec<&str> = task.required_skills.iter().map(String::as_str).collect();
    println!("Skills:      {}", if skills.is_empty() { "-".to_string() } else { skills.join(", ") });

    if let Some(ref timer) = snapshot.timer {
        println!("---");
        println!("Timer:       {}", timer.status);
        println!("Window:      {} .. {}", timer.window_start, timer.window_end);
        println!(
            "Extensions:  {}/{}",
            timer.extensions_count, timer.max_extensions
        );
        if timer.status.is_terminal() {
            println!("Remaining:   -");
        } else {
            println!("Remaining:   {}s", timer.remaining(now).num_seconds());
        }
    }

    if let Some(ref bucket) = snapshot.bucket {
        println!("---");
        println!("Bucket:      {}", bucket.status);
        println!(
            "Counts:      {} total, {} reviewed, {} approved, {} rejected",
            bucket.total_applications,
            bucket.reviewed_applications,
            bucket.approved_applications,
            bucket.rejected_applications
        );
    }

    if !snapshot.applications.is_empty() {
        println!("---");
        println!("{:<36}  {:<20}  SELECTION", "WORKER", "APPLIED");
        for app in &snapshot.applications {
            println!(
                "{:<36}  {:<20}  {:?}",
                app.worker_id,
                app.applied_at.format("%Y-%m-%d %H:%M:%S"),
                app.selection
            );
        }
    }
}
