//! Shell command runner with a hard timeout.
//!
//! Commands run as `<shell> -c <command>` in their own process group, so a
//! timeout kills the whole tree and not just the shell. Output is captured
//! incrementally: whatever was written before a kill is still returned.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::DEFAULT_SHELL;
use crate::error::RunnerError;

/// Maximum captured bytes per stream (1MB). The rest is drained and dropped.
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How long to keep draining pipes once the child has exited or been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Everything a single command execution produced.
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` only when the command exited with status 0.
    pub error: Option<RunnerError>,
    pub timed_out: bool,
    /// Wall time from spawn until the child exited or was killed. Time spent
    /// draining pipes afterwards is not included.
    pub elapsed: Duration,
}

/// Executes a command string under a timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &str, timeout: Duration) -> CommandOutput;
}

/// Runs commands through a shell (`/bin/bash -c` by default).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    /// Use a different shell binary.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, command: &str, timeout: Duration) -> CommandOutput {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return CommandOutput {
                    error: Some(RunnerError::Spawn {
                        shell: self.shell.clone(),
                        source,
                    }),
                    elapsed: start.elapsed(),
                    ..Default::default()
                };
            }
        };

        let stdout = Capture::spawn(child.stdout.take());
        let stderr = Capture::spawn(child.stderr.take());

        let (error, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (exit_error(status), false),
            Ok(Err(e)) => (Some(RunnerError::Io(e)), false),
            Err(_) => {
                kill_tree(&mut child).await;
                (Some(RunnerError::Timeout { timeout }), true)
            }
        };
        let elapsed = start.elapsed();

        let (stdout, stderr) = tokio::join!(stdout.finish(), stderr.finish());
        CommandOutput {
            stdout,
            stderr,
            error,
            timed_out,
            elapsed,
        }
    }
}

/// Map a non-zero exit into an error.
fn exit_error(status: ExitStatus) -> Option<RunnerError> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(RunnerError::Exit { code });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(RunnerError::Signal { signal });
        }
    }
    Some(RunnerError::Exit { code: -1 })
}

/// SIGKILL the child's process group, then kill and reap the child itself.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: killpg only sends a signal. The child was spawned with
            // process_group(0), so its pgid equals its pid.
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!("Failed to kill timed out command: {}", e);
    }
}

/// Background reader for one output pipe.
struct Capture {
    buf: Arc<Mutex<Captured>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

impl Capture {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Captured::default()));
        let handle = stream.map(|mut stream| {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let mut captured = buf.lock().unwrap_or_else(PoisonError::into_inner);
                    let room = MAX_OUTPUT_SIZE.saturating_sub(captured.bytes.len());
                    let keep = n.min(room);
                    captured.bytes.extend_from_slice(&chunk[..keep]);
                    captured.dropped += n - keep;
                }
            })
        });
        Self { buf, handle }
    }

    /// Wait briefly for EOF, then return whatever was read.
    async fn finish(mut self) -> String {
        if let Some(mut handle) = self.handle.take()
            && tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err()
        {
            // A detached grandchild still holds the pipe open.
            handle.abort();
        }

        let captured = {
            let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *buf)
        };
        let text = String::from_utf8_lossy(&captured.bytes).into_owned();
        if captured.dropped == 0 {
            text
        } else {
            format!("{}\n\n... [truncated {} bytes]", text, captured.dropped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_SECS: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_echo_command() {
        let out = ShellRunner::new().execute("echo hello", TEN_SECS).await;
        assert!(out.stdout.contains("hello"));
        assert!(out.stderr.is_empty());
        assert!(out.error.is_none());
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_shell_features() {
        let out = ShellRunner::new()
            .execute("echo abc | tr a x; echo err 1>&2", TEN_SECS)
            .await;
        assert_eq!(out.stdout.trim(), "xbc");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let out = ShellRunner::new()
            .execute("echo oops 1>&2; exit 3", TEN_SECS)
            .await;
        assert!(matches!(out.error, Some(RunnerError::Exit { code: 3 })));
        assert!(out.stderr.contains("oops"));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let start = Instant::now();
        let out = ShellRunner::new()
            .execute("echo before; sleep 5", Duration::from_millis(300))
            .await;
        assert!(out.timed_out);
        assert!(matches!(out.error, Some(RunnerError::Timeout { .. })));
        assert!(out.stdout.contains("before"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        // The backgrounded sleep inherits stdout; without a group kill the
        // drain would wait out the full grace period.
        let start = Instant::now();
        let out = ShellRunner::new()
            .execute("sleep 30 & sleep 30", Duration::from_millis(200))
            .await;
        assert!(out.timed_out);
        assert!(start.elapsed() < DRAIN_GRACE);
    }

    #[tokio::test]
    async fn test_elapsed_excludes_drain() {
        // The shell exits at once but the background sleep keeps stdout open,
        // so the drain runs into its grace period.
        let out = ShellRunner::new()
            .execute("echo started; sleep 3 &", TEN_SECS)
            .await;
        assert!(out.error.is_none());
        assert!(out.stdout.contains("started"));
        assert!(out.elapsed < Duration::from_secs(1), "elapsed {:?}", out.elapsed);
    }

    #[tokio::test]
    async fn test_timeout_elapsed_tracks_kill() {
        let out = ShellRunner::new()
            .execute("sleep 5", Duration::from_millis(300))
            .await;
        assert!(out.timed_out);
        assert!(out.elapsed >= Duration::from_millis(300));
        assert!(out.elapsed < Duration::from_secs(2), "elapsed {:?}", out.elapsed);
    }

    #[tokio::test]
    async fn test_missing_shell() {
        let out = ShellRunner::new()
            .with_shell("/nonexistent/shell")
            .execute("echo hello", TEN_SECS)
            .await;
        assert!(matches!(out.error, Some(RunnerError::Spawn { .. })));
        assert!(!out.timed_out);
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let cmd = format!("head -c {} /dev/zero | tr '\\0' x", MAX_OUTPUT_SIZE + 100);
        let out = ShellRunner::new().execute(&cmd, TEN_SECS).await;
        assert!(out.error.is_none());
        assert!(out.stdout.contains("[truncated 100 bytes]"));
    }

    #[test]
    fn test_exit_error_success() {
        use std::os::unix::process::ExitStatusExt;
        assert!(exit_error(ExitStatus::from_raw(0)).is_none());
        assert!(matches!(
            exit_error(ExitStatus::from_raw(2 << 8)),
            Some(RunnerError::Exit { code: 2 })
        ));
        assert!(matches!(
            exit_error(ExitStatus::from_raw(9)),
            Some(RunnerError::Signal { signal: 9 })
        ));
    }
}
