// ABOUTME: Subprocess execution abstraction for the IaC toolchain.
// ABOUTME: Timeouts and missing tools are explicit error kinds, not panics.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Default binary name for the IaC toolchain CLI.
pub const AZ_CLI: &str = "az";

/// Captured output of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// True iff the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout and stderr joined, for pattern matching against tool text.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Errors from running an external command.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The command did not finish within the allotted wall-clock time.
    #[error("command timed out after {0} seconds")]
    TimedOut(u64),

    /// The tool binary is not installed or not on PATH.
    #[error("tool not found: {0}")]
    ToolMissing(String),

    #[error("failed to run command: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to run an external command with a bounded wall-clock timeout.
///
/// The deployment pipeline never shells out directly; everything goes
/// through this seam so tests can script tool behavior.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProcessError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProcessError> {
        debug!(program, ?args, timeout_secs = timeout.as_secs(), "running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProcessError::ToolMissing(program.to_string())
                } else {
                    ProcessError::Io(e)
                }
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::TimedOut(timeout.as_secs()))??;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
