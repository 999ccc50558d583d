//! Store traits consumed by the job runner.
//!
//! Each collaborator is a narrow async trait so a job can be wired to the
//! libSQL backend, or to test doubles that fail on purpose.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::task::{RunLog, RunLogEntry, Task, User};

/// Source of task definitions and sink for run statistics.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Get a task by id.
    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError>;

    /// Set `prev_time` and `execute_times` for one task. Touches nothing else.
    async fn update_stats(
        &self,
        id: i64,
        prev_time: i64,
        execute_times: u64,
    ) -> Result<(), DatabaseError>;
}

/// Audit trail of executions.
#[async_trait]
pub trait RunLogStore: Send + Sync {
    /// Insert a run record. Returns the generated log id.
    async fn insert_run_log(&self, log: &RunLog) -> Result<i64, DatabaseError>;

    /// Most recent run records for a task, newest first.
    async fn list_run_logs(
        &self,
        task_id: i64,
        limit: usize,
    ) -> Result<Vec<RunLogEntry>, DatabaseError>;
}

/// Account lookup for notification recipients.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError>;
}
