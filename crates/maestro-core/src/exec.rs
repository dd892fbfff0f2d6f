//! External tool execution.
//!
//! Every git, `gh` and stage invocation goes through [`ToolRunner`], which
//! keeps two outcomes apart: the tool is absent ([`ToolError::NotFound`]) or
//! the tool ran and returned a non-zero exit code (a [`ToolOutput`] whose
//! `exit_code != 0`). Callers degrade gracefully on the former and fail hard
//! on the latter.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::domain::MaestroError;

/// Captured result of a tool that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Turn a non-zero exit into [`MaestroError::ToolFailed`] carrying the
    /// tool's raw error text.
    pub fn check(self, tool: &str, operation: &str) -> Result<Self, MaestroError> {
        if self.success() {
            return Ok(self);
        }
        let stderr = if self.stderr.trim().is_empty() {
            format!("exit code {}: {}", self.exit_code, self.stdout.trim())
        } else {
            self.stderr.trim().to_string()
        };
        Err(MaestroError::ToolFailed {
            tool: tool.to_string(),
            operation: operation.to_string(),
            stderr,
        })
    }
}

/// Reasons a tool could not produce a [`ToolOutput`].
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{program} timed out after {secs} seconds")]
    TimedOut { program: String, secs: u64 },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Map into the domain taxonomy: an absent tool becomes
    /// [`MaestroError::ToolUnavailable`], anything else a tool failure.
    pub fn into_domain(self, tool: &str, operation: &str) -> MaestroError {
        match self {
            ToolError::NotFound(program) => MaestroError::ToolUnavailable(program),
            other => MaestroError::ToolFailed {
                tool: tool.to_string(),
                operation: operation.to_string(),
                stderr: other.to_string(),
            },
        }
    }
}

/// Capability to run external tools.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, optionally bounded by `timeout`.
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError>;

    /// Whether `program` can be resolved at all.
    fn is_available(&self, program: &str) -> bool;

    /// Run `program` with `args` and no timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        self.run_with_timeout(program, args, None).await
    }
}

/// Runs real processes via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner {
    working_dir: Option<PathBuf>,
}

impl SystemToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every tool from `dir` instead of the process working directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        debug!(program = %program, ?args, "Running tool");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(program.to_string())
            } else {
                ToolError::Spawn {
                    program: program.to_string(),
                    source: e,
                }
            }
        })?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    program: program.to_string(),
                    secs: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ToolError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn is_available(&self, program: &str) -> bool {
        command_exists(program)
    }
}

/// Check whether a command resolves on `PATH` (or, for paths, exists).
pub fn command_exists(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate);
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
