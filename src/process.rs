//! External command execution
//!
//! Every subprocess the manager launches (uv, the env interpreter, GPU
//! probes, the native build) goes through [`CommandRunner`] so that each
//! call carries a timeout and fails closed.

use crate::errors::{Result, SetupError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

/// A fully described command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Run `line` through the platform shell (pipes, env assignments)
    pub fn shell(line: &str) -> Self {
        #[cfg(windows)]
        {
            Self::new("cmd", ["/C", line])
        }
        #[cfg(not(windows))]
        {
            Self::new("sh", ["-c", line])
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    /// Human-readable command line for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty line of stderr, falling back to stdout
    pub fn last_line(&self) -> String {
        self.stderr
            .lines()
            .chain(self.stdout.lines())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("")
            .to_string()
    }

    /// Turn a non-zero exit into a `SetupError::Command`
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SetupError::Command {
                command: spec.display(),
                reason: format!("exit code {}: {}", self.exit_code, self.last_line()),
            })
        }
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Start a long-lived background process and return immediately
    fn spawn_detached(&self, spec: &CommandSpec) -> Result<()>;
}

/// Runs commands on the host with tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(command = %spec.display(), "running command");

        match timeout(spec.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                tracing::debug!(
                    command = %spec.display(),
                    exit_code = result.exit_code,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "command finished"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(SetupError::Command {
                command: spec.display(),
                reason: format!("failed to execute: {}", e),
            }),
            Err(_) => {
                tracing::warn!(command = %spec.display(), "command timed out");
                Err(SetupError::timeout(spec.timeout))
            }
        }
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<()> {
        std::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SetupError::Command {
                command: spec.display(),
                reason: format!("failed to spawn: {}", e),
            })?;
        tracing::info!(command = %spec.display(), "spawned background process");
        Ok(())
    }
}
