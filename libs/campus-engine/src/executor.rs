//! Single-process shell execution with a hard wall-clock timeout.
//!
//! The executor runs exactly one `sh -c` child per invocation and captures
//! merged stdout/stderr. It never interprets output; that is the
//! validator's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use campus_common::types::ExecutionResult;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::EngineError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Safety limits so pathological submissions never reach the shell.
const MAX_COMMAND_BYTES: usize = 64 * 1024;
const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024;

/// One command to run, with its execution context.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub command: String,
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

pub struct ProcessExecutor {
    default_timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Run one command to completion or until its wall-clock budget expires.
    ///
    /// On timeout the whole process group is killed and `timed_out = true`
    /// is returned; nothing is left running after this call.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult, EngineError> {
        if spec.command.len() > MAX_COMMAND_BYTES {
            return Err(EngineError::InvalidSubmission(format!(
                "command exceeds {} bytes",
                MAX_COMMAND_BYTES
            )));
        }
        if let Some(input) = &spec.stdin {
            if input.len() > MAX_STDIN_BYTES {
                return Err(EngineError::InvalidSubmission(format!(
                    "input exceeds {} bytes",
                    MAX_STDIN_BYTES
                )));
            }
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // Own process group, so a timeout can reap the whole tree and not
        // just the shell.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        let limit = spec.timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                if !out.stderr.is_empty() {
                    output.push_str(&String::from_utf8_lossy(&out.stderr));
                }
                let result = ExecutionResult {
                    output,
                    exit_code: out.status.code(),
                    timed_out: false,
                    duration: start.elapsed(),
                };
                debug!(
                    exit_code = ?result.exit_code,
                    duration_ms = result.duration.as_millis() as u64,
                    "command finished"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(EngineError::Io(e)),
            Err(_) => {
                kill_process_group(pid);
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "command exceeded its wall-clock budget, process group killed"
                );
                Ok(ExecutionResult {
                    output: String::new(),
                    exit_code: None,
                    timed_out: true,
                    duration: start.elapsed(),
                })
            }
        }
    }

    /// Convenience wrapper for a bare command in an optional directory.
    pub async fn run_in(
        &self,
        command: &str,
        cwd: Option<&Path>,
        limit: Duration,
    ) -> Result<ExecutionResult, EngineError> {
        let mut spec = CommandSpec::shell(command).with_timeout(limit);
        if let Some(dir) = cwd {
            spec = spec.with_cwd(dir);
        }
        self.run(&spec).await
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
