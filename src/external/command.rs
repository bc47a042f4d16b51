//! Base command execution abstraction
//!
//! Provides the foundational trait for executing external commands, enabling
//! dependency injection for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

/// A fully rendered external command, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shell-like rendering used in logs, attempt records and error messages.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    /// Turns a non-zero exit into `CommandError::NonZeroExit`.
    ///
    /// The executor itself reports any exit status as `Ok`; callers that treat
    /// non-zero as fatal go through here so the captured output is kept.
    pub fn ensure_success(self, invocation: &CommandInvocation) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::NonZeroExit {
                command: invocation.command_line(),
                status_code: self.status_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("Command `{command}` exited with status {status_code}")]
    NonZeroExit {
        command: String,
        status_code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("Command `{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("IO error running `{command}`: {message}")]
    Io { command: String, message: String },
}

/// Trait for executing external commands
///
/// This abstraction allows the rest of the codebase to execute commands
/// without directly depending on `tokio::process::Command`, enabling testing
/// with mock implementations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs the command to completion. Any exit status is `Ok`; only spawn
    /// failures and timeouts are errors.
    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput, CommandError>;
}

/// Real implementation using `tokio::process::Command`
pub struct ProcessCommandExecutor;

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput, CommandError> {
        use tokio::process::Command;

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        debug!(command = %invocation.command_line(), "Spawning external command");

        let running = command.output();
        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, running).await.map_err(|_| {
                CommandError::Timeout {
                    command: invocation.command_line(),
                    timeout_ms: limit.as_millis() as u64,
                }
            })?,
            None => running.await,
        }
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandError::CommandNotFound {
                    command: invocation.program.clone(),
                }
            } else {
                CommandError::Io {
                    command: invocation.command_line(),
                    message: e.to_string(),
                }
            }
        })?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Runs a read-only command, retrying up to `retries` extra times on failure.
///
/// Only for commands with no side effects (`workspace show`, `output`, ...).
/// Timeouts are not retried.
pub async fn execute_read_only(
    executor: &dyn CommandExecutor,
    invocation: &CommandInvocation,
    retries: u32,
) -> Result<CommandOutput, CommandError> {
    let mut attempt = 0;
    loop {
        let result = executor
            .execute(invocation)
            .await
            .and_then(|output| output.ensure_success(invocation));
        match result {
            Ok(output) => return Ok(output),
            Err(error @ CommandError::Timeout { .. }) => return Err(error),
            Err(error) if attempt < retries => {
                attempt += 1;
                warn!(
                    command = %invocation.command_line(),
                    attempt = attempt,
                    error = %error,
                    "Read-only command failed, retrying"
                );
            }
            Err(error) => return Err(error),
        }
    }
}
