//! Subprocess execution seam for the mm* administrative commands.
//!
//! All collectors go through the [`CommandRunner`] trait. Production binds it
//! to [`SudoRunner`], which spawns the real binaries (behind a configurable
//! privilege-escalation prefix) with a hard deadline. Tests bind it to
//! [`MockRunner`], a table of canned responses keyed by the full command line.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Outcome classification for a subprocess invocation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The deadline elapsed before the process exited. Partial output is discarded.
    #[error("command timed out")]
    Timeout,
    /// Nonzero exit or termination by signal.
    #[error("command failed: {0}")]
    Failed(String),
    /// The process could not be spawned or its stdin could not be written.
    #[error("failed to run command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl RunnerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout)
    }
}

/// Runs one subprocess to completion and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RunnerError>;
}

/// Production runner. Prefixes each command with a privilege-escalation
/// command (default `sudo`) unless the prefix is empty.
pub struct SudoRunner {
    sudo: String,
}

impl SudoRunner {
    pub fn new(sudo: impl Into<String>) -> Self {
        Self { sudo: sudo.into() }
    }
}

impl Default for SudoRunner {
    fn default() -> Self {
        Self::new("sudo")
    }
}

#[async_trait]
impl CommandRunner for SudoRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RunnerError> {
        let mut command = if self.sudo.is_empty() {
            let mut c = Command::new(program);
            c.args(args);
            c
        } else {
            let mut c = Command::new(&self.sudo);
            c.arg(program).args(args);
            c
        };

        debug!("Running command: {} {}", program, args.join(" "));

        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The child must not outlive the deadline; dropping the handle on
            // timeout sends SIGKILL.
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pipe = child.stdin.take();

        // The whole interaction is bounded: a child that never drains its
        // stdin must not stall the write past the deadline.
        let output = tokio::time::timeout(timeout, async {
            if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                pipe.write_all(input.as_bytes()).await?;
                drop(pipe);
            }
            child.wait_with_output().await
        })
        .await
        .map_err(|_| RunnerError::Timeout)??;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RunnerError::Failed(format!(
                "{} {}: {} {}",
                program,
                args.join(" "),
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// Canned response for one command line in a [`MockRunner`].
enum MockResponse {
    Output { stdout: String, delay: Option<Duration> },
    Failure,
    Timeout,
}

/// Test runner backed by a table of {command line -> canned response}.
///
/// The key is the program followed by its arguments, joined with single
/// spaces. Commands without an entry fail, so a test only exercises the
/// collectors it has set up.
#[derive(Default)]
pub struct MockRunner {
    responses: Mutex<HashMap<String, MockResponse>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(self, command: &str, response: MockResponse) -> Self {
        self.responses
            .lock()
            .expect("mock runner poisoned")
            .insert(command.to_string(), response);
        self
    }

    pub fn with_output(self, command: &str, stdout: &str) -> Self {
        self.insert(
            command,
            MockResponse::Output {
                stdout: stdout.to_string(),
                delay: None,
            },
        )
    }

    pub fn with_delayed_output(self, command: &str, stdout: &str, delay: Duration) -> Self {
        self.insert(
            command,
            MockResponse::Output {
                stdout: stdout.to_string(),
                delay: Some(delay),
            },
        )
    }

    pub fn with_failure(self, command: &str) -> Self {
        self.insert(command, MockResponse::Failure)
    }

    pub fn with_timeout(self, command: &str) -> Self {
        self.insert(command, MockResponse::Timeout)
    }

    /// Swaps the canned response for a command to a failure. Lets a test
    /// flip an already-shared runner between scrapes.
    pub fn replace_with_failure(&self, command: &str) {
        self.responses
            .lock()
            .expect("mock runner poisoned")
            .insert(command.to_string(), MockResponse::Failure);
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RunnerError> {
        let key = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };

        let (stdout, delay) = {
            let responses = self.responses.lock().expect("mock runner poisoned");
            match responses.get(&key) {
                Some(MockResponse::Output { stdout, delay }) => (stdout.clone(), *delay),
                Some(MockResponse::Failure) => {
                    return Err(RunnerError::Failed(format!("{}: exit status 1", key)))
                }
                Some(MockResponse::Timeout) => return Err(RunnerError::Timeout),
                None => {
                    return Err(RunnerError::Failed(format!(
                        "no canned output for command: {}",
                        key
                    )))
                }
            }
        };

        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(RunnerError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }

        Ok(stdout.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sudo_runner_captures_stdout() {
        let runner = SudoRunner::new("");
        let out = runner
            .run("echo", &["hello"], None, Duration::from_secs(5))
            .await
            .expect("echo failed");
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[tokio::test]
    async fn test_sudo_runner_stdin() {
        let runner = SudoRunner::new("");
        let out = runner
            .run("cat", &[], Some("fs_io_s\n"), Duration::from_secs(5))
            .await
            .expect("cat failed");
        assert_eq!(String::from_utf8_lossy(&out), "fs_io_s\n");
    }

    #[tokio::test]
    async fn test_sudo_runner_nonzero_exit() {
        let runner = SudoRunner::new("");
        let err = runner
            .run("false", &[], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Failed(_)));
    }

    #[tokio::test]
    async fn test_sudo_runner_deadline() {
        let runner = SudoRunner::new("");
        let err = runner
            .run("sleep", &["5"], None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_sudo_runner_stalled_stdin_hits_deadline() {
        let runner = SudoRunner::new("");
        // Larger than the pipe buffer, fed to a child that never reads.
        let input = "x".repeat(2 * 1024 * 1024);
        let err = runner
            .run("sleep", &["5"], Some(&input), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_mock_runner_table() {
        let runner = MockRunner::new()
            .with_output("mmgetstate -Y", "state output")
            .with_failure("mmdf project -Y")
            .with_timeout("mmhealth node show -Y");

        let out = runner
            .run("mmgetstate", &["-Y"], None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, b"state output");

        let err = runner
            .run("mmdf", &["project", "-Y"], None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Failed(_)));

        let err = runner
            .run(
                "mmhealth",
                &["node", "show", "-Y"],
                None,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let err = runner
            .run("mmlsfs", &["all", "-Y"], None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_runner_delay_exceeding_deadline() {
        let runner = MockRunner::new().with_delayed_output(
            "mmdf project -Y",
            "late",
            Duration::from_secs(10),
        );
        let err = runner
            .run("mmdf", &["project", "-Y"], None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
