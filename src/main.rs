use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::prelude::*;

use task_runner::config::{RunnerConfig, SmtpConfig};
use task_runner::job::{JobDeps, JobRegistry};
use task_runner::notify::{LogMailer, Mailer, Notifier, SmtpMailer};
use task_runner::store::{LibSqlBackend, RunLogStore};

const USAGE: &str = "usage: task-runner run <task-id> | logs <task-id> [limit] [--json]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Held until exit so buffered log lines are flushed.
    let _log_guard = init_tracing();

    let (flags, args): (Vec<String>, Vec<String>) =
        std::env::args().skip(1).partition(|arg| arg.starts_with("--"));
    let json = flags.iter().any(|flag| flag == "--json");
    let (command, task_id) = match args.as_slice() {
        [command, id, ..] => (
            command.as_str(),
            id.parse::<i64>()
                .with_context(|| format!("invalid task id: {id}"))?,
        ),
        _ => bail!(USAGE),
    };

    let config = RunnerConfig::from_env();
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    match command {
        "run" => run_task(&config, db, task_id).await,
        "logs" => {
            let limit = match args.get(2) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid limit: {raw}"))?,
                None => 20,
            };
            print_logs(db.as_ref(), task_id, limit, json).await
        }
        _ => bail!(USAGE),
    }
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("TASK_RUNNER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "task-runner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn run_task(config: &RunnerConfig, db: Arc<LibSqlBackend>, task_id: i64) -> anyhow::Result<()> {
    let mailer: Arc<dyn Mailer> = match SmtpConfig::from_env() {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "SMTP notifications enabled");
            Arc::new(SmtpMailer::new(smtp))
        }
        None => {
            tracing::info!("SMTP_HOST not set, notifications will only be logged");
            Arc::new(LogMailer)
        }
    };
    let notifier = Arc::new(Notifier::with_mailer(db.clone(), mailer));
    let deps = JobDeps::from_config(config, db.clone(), db.clone(), notifier);
    let registry = JobRegistry::new(deps);

    let job = registry.load(task_id).await?;
    tracing::info!(task_id, name = %job.name(), "Running task");
    registry
        .trigger(task_id)
        .await?
        .await
        .context("run task failed to join")?;

    match job.log_id() {
        Some(log_id) => {
            let entries = db.list_run_logs(task_id, 1).await?;
            if let Some(entry) = entries.first() {
                println!(
                    "log #{log_id}: {} in {} ms",
                    entry.log.status, entry.log.elapsed_ms
                );
            }
        }
        None => println!("run finished without a log entry"),
    }
    Ok(())
}

async fn print_logs(
    db: &LibSqlBackend,
    task_id: i64,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let entries = db.list_run_logs(task_id, limit).await?;
    if json {
        // One object per line, newest first.
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }
    if entries.is_empty() {
        println!("no runs recorded for task {task_id}");
        return Ok(());
    }
    for entry in entries {
        let log = &entry.log;
        println!(
            "#{} {} {} {} ms",
            entry.id,
            log.created_at.format("%Y-%m-%d %H:%M:%S"),
            log.status,
            log.elapsed_ms
        );
        if !log.error.is_empty() {
            println!("  error: {}", log.error.trim_end());
        }
    }
    Ok(())
}
