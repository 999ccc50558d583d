//! Core types for scheduled tasks.
//!
//! A task is owned by the task store; the runner only reads its definition
//! and writes back two statistics fields after each execution.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A scheduled shell task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub command: String,
    /// Timeout in seconds. 0 means the runner's default ceiling.
    pub timeout_secs: u64,
    /// Whether overlapping executions of this task are allowed.
    pub concurrent: bool,
    pub notify: NotifyPolicy,
    /// Extra recipients, one address per line.
    pub notify_email: String,
    pub owner_id: i64,

    // Run statistics (store-managed)
    /// Start of the previous run, seconds since the epoch.
    pub prev_time: i64,
    pub execute_times: u64,
}

impl Task {
    pub fn new(id: i64, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            command: command.into(),
            timeout_secs: 0,
            concurrent: false,
            notify: NotifyPolicy::Off,
            notify_email: String::new(),
            owner_id: 0,
            prev_time: 0,
            execute_times: 0,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_notify(mut self, policy: NotifyPolicy, owner_id: i64) -> Self {
        self.notify = policy;
        self.owner_id = owner_id;
        self
    }

    pub fn with_notify_email(mut self, emails: impl Into<String>) -> Self {
        self.notify_email = emails.into();
        self
    }

    /// Carbon-copy recipients: one per line, trimmed, blank lines skipped.
    pub fn cc_list(&self) -> Vec<String> {
        self.notify_email
            .split('\n')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// When to send a result notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotifyPolicy {
    #[default]
    Off,
    OnFailure,
    Always,
}

impl NotifyPolicy {
    /// Integer stored in the `tasks.enable_notify` column.
    pub fn code(self) -> i64 {
        match self {
            NotifyPolicy::Off => 0,
            NotifyPolicy::OnFailure => 1,
            NotifyPolicy::Always => 2,
        }
    }

    /// Unknown codes map to `Off`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => NotifyPolicy::OnFailure,
            2 => NotifyPolicy::Always,
            _ => NotifyPolicy::Off,
        }
    }

    /// Whether a run with the given outcome should be reported.
    pub fn should_notify(self, status: RunStatus) -> bool {
        match self {
            NotifyPolicy::Off => false,
            NotifyPolicy::OnFailure => status != RunStatus::Success,
            NotifyPolicy::Always => true,
        }
    }
}

/// Outcome of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failure => write!(f, "failure"),
            RunStatus::Timeout => write!(f, "timeout"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "timeout" => Ok(RunStatus::Timeout),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Persisted audit record of one execution.
#[derive(Debug, Clone, Serialize)]
pub struct RunLog {
    pub task_id: i64,
    pub output: String,
    pub error: String,
    pub elapsed_ms: u64,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// A run log as read back from the store. Serializes flat, as printed by
/// `task-runner logs --json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    pub id: i64,
    #[serde(flatten)]
    pub log: RunLog,
}

/// Account that owns a task and receives its notifications.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_entry_serializes_flat() {
        let entry = RunLogEntry {
            id: 12,
            log: RunLog {
                task_id: 4,
                output: "hello\n".to_string(),
                error: String::new(),
                elapsed_ms: 35,
                status: RunStatus::Timeout,
                created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            },
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["id"], 12);
        assert_eq!(json["task_id"], 4);
        assert_eq!(json["status"], "timeout");
        assert_eq!(json["elapsed_ms"], 35);
        assert_eq!(json["created_at"], "2023-11-14T22:13:20Z");
        assert!(json.get("log").is_none());
    }

    #[test]
    fn run_status_display_parse() {
        for status in [RunStatus::Success, RunStatus::Failure, RunStatus::Timeout] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("running".parse::<RunStatus>().is_err());
    }

    #[test]
    fn notify_policy_gating() {
        use RunStatus::*;

        for status in [Success, Failure, Timeout] {
            assert!(!NotifyPolicy::Off.should_notify(status));
            assert!(NotifyPolicy::Always.should_notify(status));
        }
        assert!(!NotifyPolicy::OnFailure.should_notify(Success));
        assert!(NotifyPolicy::OnFailure.should_notify(Failure));
        assert!(NotifyPolicy::OnFailure.should_notify(Timeout));
    }

    #[test]
    fn notify_policy_codes() {
        for policy in [NotifyPolicy::Off, NotifyPolicy::OnFailure, NotifyPolicy::Always] {
            assert_eq!(NotifyPolicy::from_code(policy.code()), policy);
        }
        assert_eq!(NotifyPolicy::from_code(7), NotifyPolicy::Off);
    }

    #[test]
    fn cc_list_trims_and_skips_blank_lines() {
        let task = Task::new(1, "backup", "true")
            .with_notify_email("  ops@example.com \n\n dev@example.com\r\n");
        assert_eq!(task.cc_list(), vec!["ops@example.com", "dev@example.com"]);
    }

    #[test]
    fn cc_list_empty() {
        assert!(Task::new(1, "backup", "true").cc_list().is_empty());
    }
}
