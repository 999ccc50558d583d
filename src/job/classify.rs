//! Outcome classification for a finished command.

use std::time::Duration;

use crate::error::RunnerError;
use crate::task::RunStatus;

/// Separator between the timeout notice and captured stderr.
const TIMEOUT_RULE: &str = "----------------------";

/// Status tag plus the error text stored on the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: RunStatus,
    pub error: String,
}

/// Map a runner result to an outcome.
///
/// Timeout wins over any process error: a killed process also reports a
/// non-zero status, but the log must show the real cause.
pub fn classify(
    error: Option<&RunnerError>,
    timed_out: bool,
    timeout: Duration,
    stderr: &str,
) -> Classification {
    if timed_out {
        return Classification {
            status: RunStatus::Timeout,
            error: format!(
                "execution exceeded {} seconds\n{}\n{}\n",
                timeout.as_secs(),
                TIMEOUT_RULE,
                stderr
            ),
        };
    }

    match error {
        Some(e) => Classification {
            status: RunStatus::Failure,
            error: format!("{}:{}", e, stderr),
        },
        None => Classification {
            status: RunStatus::Success,
            error: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn success_ignores_output() {
        let c = classify(None, false, TIMEOUT, "warning: something on stderr");
        assert_eq!(c.status, RunStatus::Success);
        assert!(c.error.is_empty());
    }

    #[test]
    fn failure_includes_error_and_stderr() {
        let err = RunnerError::Exit { code: 3 };
        let c = classify(Some(&err), false, TIMEOUT, "no such file");
        assert_eq!(c.status, RunStatus::Failure);
        assert_eq!(c.error, "exit status 3:no such file");
    }

    #[test]
    fn timeout_takes_precedence_over_error() {
        let err = RunnerError::Signal { signal: 9 };
        let c = classify(Some(&err), true, Duration::from_secs(1), "partial");
        assert_eq!(c.status, RunStatus::Timeout);
        assert!(c.error.starts_with("execution exceeded 1 seconds"));
        assert!(c.error.contains("partial"));
    }

    #[test]
    fn spawn_failure_is_failure_not_timeout() {
        let err = RunnerError::Spawn {
            shell: "/bin/bash".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let c = classify(Some(&err), false, TIMEOUT, "");
        assert_eq!(c.status, RunStatus::Failure);
        assert!(c.error.starts_with("Failed to start /bin/bash"));
    }
}
