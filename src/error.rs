//! Error types for the task runner.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures while building a job from a task definition.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Task has no id (got {id})")]
    MissingId { id: i64 },

    #[error("Task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("Failed to load task {id}: {source}")]
    Load {
        id: i64,
        #[source]
        source: DatabaseError,
    },
}

/// Command runner errors.
///
/// `Timeout` is synthetic: it is produced by the runner itself when the
/// timer wins the race against the child process.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Failed to start {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("exit status {code}")]
    Exit { code: i32 },

    #[error("terminated by signal {signal}")]
    Signal { signal: i32 },

    #[error("Failed waiting for command: {0}")]
    Io(#[from] std::io::Error),
}

/// Notification errors. Never escalated past the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Owner lookup failed for user {user_id}: {reason}")]
    AccountLookup { user_id: i64, reason: String },

    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Mail transport failed: {0}")]
    Transport(String),
}
