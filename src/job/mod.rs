//! Job execution: one task definition bound to its runtime guard.
//!
//! `Job::run()` is called by an external trigger with nobody waiting on the
//! result, so it never returns an error. Every outcome ends up in the run log,
//! the task statistics, an optional notification, or the tracing output.
//!
//! Per run:
//! 1. Non-reentrancy check (atomic, drops the trigger if a run is active)
//! 2. Concurrency gate acquire (released on every exit path)
//! 3. Command execution under the effective timeout
//! 4. Classification, run log, statistics, notification

pub mod classify;
pub mod registry;

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use futures::FutureExt;
use tokio::sync::Mutex;

pub use classify::{Classification, classify};
pub use registry::JobRegistry;

use crate::config::RunnerConfig;
use crate::error::JobError;
use crate::notify::Notifier;
use crate::runner::{CommandRunner, ConcurrencyGate, ShellRunner};
use crate::store::{RunLogStore, TaskStore};
use crate::task::{RunLog, RunStatus, Task};

/// Collaborators shared by every job in the process.
#[derive(Clone)]
pub struct JobDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub logs: Arc<dyn RunLogStore>,
    pub notifier: Arc<Notifier>,
    pub runner: Arc<dyn CommandRunner>,
    pub gate: ConcurrencyGate,
    /// Used when a task's own timeout is 0.
    pub default_timeout: Duration,
}

impl JobDeps {
    /// Shell runner and gate built from `config`.
    pub fn from_config(
        config: &RunnerConfig,
        tasks: Arc<dyn TaskStore>,
        logs: Arc<dyn RunLogStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            tasks,
            logs,
            notifier,
            runner: Arc::new(ShellRunner::new().with_shell(config.shell.clone())),
            gate: ConcurrencyGate::new(config.max_concurrent),
            default_timeout: config.default_timeout,
        }
    }
}

/// Outcome of one execution, before it is persisted and reported.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    pub status: RunStatus,
    /// Error text as stored on the run log. Empty on success.
    pub error: String,
    /// Process error message without stderr, if any.
    pub cause: Option<String>,
    pub started_at: DateTime<Local>,
    /// Effective timeout the command ran under.
    pub timeout: Duration,
}

/// In-memory execution wrapper for one task.
pub struct Job {
    id: i64,
    name: String,
    concurrent: bool,
    /// Held across the stats write so overlapping runs persist counts in order.
    task: Mutex<Task>,
    /// Number of executions currently running. >0 means busy.
    in_flight: AtomicUsize,
    /// Id of the last run log written; 0 if none.
    log_id: AtomicI64,
    deps: JobDeps,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("concurrent", &self.concurrent)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Decrements the in-flight counter when dropped, including during unwinding.
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Job {
    /// Build a job from a task definition. The task must have a positive id.
    pub fn from_task(task: Task, deps: JobDeps) -> Result<Self, JobError> {
        if task.id < 1 {
            return Err(JobError::MissingId { id: task.id });
        }
        Ok(Self {
            id: task.id,
            name: task.name.clone(),
            concurrent: task.concurrent,
            task: Mutex::new(task),
            in_flight: AtomicUsize::new(0),
            log_id: AtomicI64::new(0),
            deps,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether overlapping runs are allowed.
    pub fn concurrent(&self) -> bool {
        self.concurrent
    }

    /// Number of runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Id of the most recent run log, if one was written.
    pub fn log_id(&self) -> Option<i64> {
        match self.log_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Snapshot of the task, including statistics updated by past runs.
    pub async fn task(&self) -> Task {
        self.task.lock().await.clone()
    }

    /// Execute the task once. Never fails; see module docs.
    pub async fn run(&self) {
        let Some(_guard) = self.enter() else {
            tracing::warn!(
                task_id = self.id,
                name = %self.name,
                "Previous run has not finished, skipping this trigger"
            );
            return;
        };

        if let Err(panic) = AssertUnwindSafe(self.execute()).catch_unwind().await {
            tracing::error!(
                task_id = self.id,
                panic = %panic_message(panic.as_ref()),
                "Task run panicked\n{}",
                Backtrace::force_capture()
            );
        }
    }

    /// Claim an in-flight slot. Check and increment are one atomic step, so
    /// two racing triggers cannot both see an idle job.
    fn enter(&self) -> Option<InFlightGuard<'_>> {
        if self.concurrent {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
        } else {
            self.in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .ok()?;
        }
        Some(InFlightGuard {
            counter: &self.in_flight,
        })
    }

    async fn execute(&self) {
        let _permit = self.deps.gate.acquire().await;

        let task = self.task().await;
        let timeout = effective_timeout(task.timeout_secs, self.deps.default_timeout);
        tracing::debug!(task_id = self.id, timeout_secs = timeout.as_secs(), "Starting task");

        let started_at = Local::now();
        let output = self.deps.runner.execute(&task.command, timeout).await;
        let elapsed_ms = output.elapsed.as_millis() as u64;

        let Classification { status, error } =
            classify(output.error.as_ref(), output.timed_out, timeout, &output.stderr);

        let result = RunResult {
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed_ms,
            status,
            error,
            cause: output.error.map(|e| e.to_string()),
            started_at,
            timeout,
        };

        tracing::info!(
            task_id = self.id,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            "Task finished"
        );

        self.record_log(&result).await;
        self.record_stats(started_at.timestamp()).await;
        self.deps.notifier.notify(&task, &result).await;
    }

    /// Persist the run log. Failures are logged and otherwise ignored.
    async fn record_log(&self, result: &RunResult) {
        let log = RunLog {
            task_id: self.id,
            output: result.stdout.clone(),
            error: result.error.clone(),
            elapsed_ms: result.elapsed_ms,
            status: result.status,
            created_at: result.started_at.with_timezone(&Utc),
        };

        match self.deps.logs.insert_run_log(&log).await {
            Ok(log_id) => {
                self.log_id.store(log_id, Ordering::Release);
                tracing::debug!(task_id = self.id, log_id, "Run log recorded");
            }
            Err(e) => tracing::error!(task_id = self.id, "Failed to record run log: {}", e),
        }
    }

    /// Bump run statistics in memory and in the task store.
    ///
    /// The task lock stays held until the store write returns, so writes from
    /// overlapping runs land in count order.
    async fn record_stats(&self, prev_time: i64) {
        let mut task = self.task.lock().await;
        task.prev_time = prev_time;
        task.execute_times += 1;

        if let Err(e) = self
            .deps
            .tasks
            .update_stats(self.id, task.prev_time, task.execute_times)
            .await
        {
            tracing::error!(task_id = self.id, "Failed to update task statistics: {}", e);
        }
    }
}

/// The task's own timeout, or `default` when it is 0.
pub fn effective_timeout(timeout_secs: u64, default: Duration) -> Duration {
    if timeout_secs > 0 {
        Duration::from_secs(timeout_secs)
    } else {
        default
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
