//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Ceiling applied when a task does not configure its own timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Shell used to interpret task commands.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Process-wide cap on simultaneous executions. 0 disables gating.
    pub max_concurrent: usize,
    /// Timeout used for tasks whose own timeout is 0.
    pub default_timeout: Duration,
    /// Shell binary; commands are run as `<shell> -c <command>`.
    pub shell: String,
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            default_timeout: DEFAULT_TIMEOUT,
            shell: DEFAULT_SHELL.to_string(),
            db_path: PathBuf::from("./data/task-runner.db"),
        }
    }
}

impl RunnerConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent = env_parse("TASK_RUNNER_MAX_CONCURRENT", defaults.max_concurrent);
        let default_timeout = Duration::from_secs(env_parse(
            "TASK_RUNNER_DEFAULT_TIMEOUT_SECS",
            defaults.default_timeout.as_secs(),
        ));
        let shell = std::env::var("TASK_RUNNER_SHELL").unwrap_or(defaults.shell);
        let db_path = std::env::var("TASK_RUNNER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        Self {
            max_concurrent,
            default_timeout,
            shell,
            db_path,
        }
    }
}

/// SMTP settings for outbound notifications.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `None` if `SMTP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        let port = env_parse("SMTP_PORT", 587u16);
        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("SMTP_FROM").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// Parse an env var, warning and falling back to `default` on bad input.
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match parse_value(key, &raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("{e}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.max_concurrent, 0);
        assert_eq!(config.default_timeout.as_secs(), 86_400);
        assert_eq!(config.shell, "/bin/bash");
    }

    #[test]
    fn parse_value_ok() {
        let v: usize = parse_value("X", " 8 ").unwrap();
        assert_eq!(v, 8);
    }

    #[test]
    fn parse_value_invalid() {
        let err = parse_value::<u16>("SMTP_PORT", "lots").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SMTP_PORT"));
    }
}
