//! libSQL backend for tasks, run logs and accounts.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{AccountStore, RunLogStore, TaskStore};
use crate::task::{NotifyPolicy, RunLog, RunLogEntry, RunStatus, Task, User};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert a task definition. Returns the generated id.
    pub async fn insert_task(&self, task: &Task) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO tasks (uid, name, command, timeout, concurrent, enable_notify, notify_email, prev_time, execute_times) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING id",
                params![
                    task.owner_id,
                    task.name.clone(),
                    task.command.clone(),
                    task.timeout_secs as i64,
                    task.concurrent as i64,
                    task.notify.code(),
                    task.notify_email.clone(),
                    task.prev_time,
                    task.execute_times as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;

        returned_id(&mut rows, "insert_task").await
    }

    /// Insert an account. Returns the generated id.
    pub async fn insert_user(&self, username: &str, email: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO users (username, email) VALUES (?1, ?2) RETURNING id",
                params![username, email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_user: {e}")))?;

        returned_id(&mut rows, "insert_user").await
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn returned_id(rows: &mut libsql::Rows, op: &str) -> Result<i64, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}"))),
        Ok(None) => Err(DatabaseError::Query(format!("{op}: no id returned"))),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

const TASK_COLUMNS: &str = "id, uid, name, command, timeout, concurrent, enable_notify, notify_email, prev_time, execute_times";

const LOG_COLUMNS: &str = "id, task_id, output, error, status, elapsed, created_at";

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("task id: {e}")))?;

    Ok(Task {
        id,
        owner_id: row.get(1).unwrap_or(0),
        name: row.get(2).unwrap_or_default(),
        command: row.get(3).unwrap_or_default(),
        timeout_secs: row.get::<i64>(4).unwrap_or(0).max(0) as u64,
        concurrent: row.get::<i64>(5).unwrap_or(0) == 1,
        notify: NotifyPolicy::from_code(row.get(6).unwrap_or(0)),
        notify_email: row.get(7).unwrap_or_default(),
        prev_time: row.get(8).unwrap_or(0),
        execute_times: row.get::<i64>(9).unwrap_or(0).max(0) as u64,
    })
}

fn row_to_run_log(row: &libsql::Row) -> Result<RunLogEntry, DatabaseError> {
    let status_str: String = row.get(4).unwrap_or_default();
    let status: RunStatus = status_str.parse().map_err(DatabaseError::Serialization)?;
    let created_str: String = row.get(6).unwrap_or_default();

    Ok(RunLogEntry {
        id: row.get(0).unwrap_or(0),
        log: RunLog {
            task_id: row.get(1).unwrap_or(0),
            output: row.get(2).unwrap_or_default(),
            error: row.get(3).unwrap_or_default(),
            status,
            elapsed_ms: row.get::<i64>(5).unwrap_or(0).max(0) as u64,
            created_at: parse_datetime(&created_str),
        },
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlBackend {
    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn update_stats(
        &self,
        id: i64,
        prev_time: i64,
        execute_times: u64,
    ) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE tasks SET prev_time = ?1, execute_times = ?2 WHERE id = ?3",
                params![prev_time, execute_times as i64, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_stats: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RunLogStore for LibSqlBackend {
    async fn insert_run_log(&self, log: &RunLog) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO task_logs (task_id, output, error, status, elapsed, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
                params![
                    log.task_id,
                    log.output.clone(),
                    log.error.clone(),
                    log.status.to_string(),
                    log.elapsed_ms as i64,
                    log.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_run_log: {e}")))?;

        returned_id(&mut rows, "insert_run_log").await
    }

    async fn list_run_logs(
        &self,
        task_id: i64,
        limit: usize,
    ) -> Result<Vec<RunLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM task_logs WHERE task_id = ?1 ORDER BY id DESC LIMIT ?2"
                ),
                params![task_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_run_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_run_log(&row) {
                Ok(entry) => logs.push(entry),
                Err(e) => tracing::warn!("Skipping run log row: {e}"),
            }
        }
        Ok(logs)
    }
}

#[async_trait]
impl AccountStore for LibSqlBackend {
    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, username, email FROM users WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(User {
                id: row.get(0).unwrap_or(id),
                username: row.get(1).unwrap_or_default(),
                email: row.get(2).unwrap_or_default(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_log(task_id: i64, status: RunStatus) -> RunLog {
        RunLog {
            task_id,
            output: "hello\n".to_string(),
            error: String::new(),
            elapsed_ms: 12,
            status,
            created_at: Utc::now(),
        }
    }

    // ── Task tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_task() {
        let db = test_db().await;
        let task = Task::new(0, "backup", "tar czf /tmp/b.tgz /etc")
            .with_timeout(30)
            .with_concurrent(true)
            .with_notify(NotifyPolicy::OnFailure, 7)
            .with_notify_email("a@example.com\nb@example.com");

        let id = db.insert_task(&task).await.unwrap();
        assert!(id > 0);

        let fetched = db.get_task(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.name, "backup");
        assert_eq!(fetched.timeout_secs, 30);
        assert!(fetched.concurrent);
        assert_eq!(fetched.notify, NotifyPolicy::OnFailure);
        assert_eq!(fetched.owner_id, 7);
        assert_eq!(fetched.cc_list().len(), 2);
    }

    #[tokio::test]
    async fn get_task_not_found() {
        let db = test_db().await;
        assert!(db.get_task(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_stats_touches_only_stats() {
        let db = test_db().await;
        let id = db
            .insert_task(&Task::new(0, "noop", "true").with_timeout(5))
            .await
            .unwrap();

        db.update_stats(id, 1_700_000_000, 3).await.unwrap();

        let fetched = db.get_task(id).await.unwrap().unwrap();
        assert_eq!(fetched.prev_time, 1_700_000_000);
        assert_eq!(fetched.execute_times, 3);
        assert_eq!(fetched.command, "true");
        assert_eq!(fetched.timeout_secs, 5);
    }

    #[tokio::test]
    async fn update_stats_missing_task() {
        let db = test_db().await;
        let err = db.update_stats(99, 0, 1).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    // ── Run log tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_list_run_logs() {
        let db = test_db().await;
        let first = db.insert_run_log(&make_log(1, RunStatus::Success)).await.unwrap();
        let second = db.insert_run_log(&make_log(1, RunStatus::Timeout)).await.unwrap();
        db.insert_run_log(&make_log(2, RunStatus::Failure)).await.unwrap();
        assert!(second > first);

        let logs = db.list_run_logs(1, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, second);
        assert_eq!(logs[0].log.status, RunStatus::Timeout);
        assert_eq!(logs[1].log.output, "hello\n");
        assert_eq!(logs[1].log.elapsed_ms, 12);

        let limited = db.list_run_logs(1, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    // ── Account tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_user() {
        let db = test_db().await;
        let id = db.insert_user("alice", "alice@example.com").await.unwrap();

        let user = db.get_user(id).await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@example.com");
        assert!(db.get_user(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runner.db");

        let id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_task(&Task::new(0, "persist", "true")).await.unwrap()
        };

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_task(id).await.unwrap().is_some());
    }
}
