//! External runner protocol.
//!
//! When true process isolation is required, the engine delegates a test
//! run to a configured runner binary: a JSON payload
//! `{exercise_type, exercise_data}` goes in on stdin, a single JSON object
//! `{pass, timed_out, exit_status, messages, output}` comes back on
//! stdout. The child's exit code is informational only; the JSON body is
//! authoritative. In-process strategies remain the default path.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::error::EngineError;

#[derive(Debug, Serialize)]
pub struct RunnerRequest<'a> {
    pub exercise_type: &'a str,
    pub exercise_data: &'a Value,
}

#[derive(Debug, Deserialize)]
pub struct RunnerReply {
    pub pass: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct ExternalRunner {
    program: String,
    args: Vec<String>,
}

impl ExternalRunner {
    /// Parse a runner command line, e.g. `"python3 /opt/runner.py"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub async fn invoke(
        &self,
        request: &RunnerRequest<'_>,
        env: &BTreeMap<String, String>,
        cwd: Option<&Path>,
        limit: Duration,
    ) -> Result<RunnerReply, EngineError> {
        let payload = serde_json::to_string(request)
            .map_err(|e| EngineError::Runner(format!("payload encoding failed: {e}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Runner(format!("failed to spawn runner: {e}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| EngineError::Runner(format!("failed to write payload: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| EngineError::Runner(format!("failed to close stdin: {e}")))?;
        }

        let out = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| EngineError::Runner("runner timed out".to_string()))?
            .map_err(|e| EngineError::Runner(format!("runner wait failed: {e}")))?;

        if !out.status.success() {
            debug!(exit_code = ?out.status.code(), "runner exited non-zero");
        }

        let body = String::from_utf8_lossy(&out.stdout);
        serde_json::from_str(body.trim()).map_err(|e| {
            error!(
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "unparseable runner output: {e}"
            );
            EngineError::Runner("runner produced unparseable output".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_splits_program_and_args() {
        let runner = ExternalRunner::parse("python3 /opt/runner.py --strict").unwrap();
        assert_eq!(runner.program, "python3");
        assert_eq!(runner.args, vec!["/opt/runner.py", "--strict"]);
        assert!(ExternalRunner::parse("   ").is_none());
    }

    #[test]
    fn reply_defaults_are_lenient() {
        let reply: RunnerReply = serde_json::from_str(r#"{"pass":true}"#).unwrap();
        assert!(reply.pass);
        assert!(!reply.timed_out);
        assert!(reply.exit_status.is_none());
        assert!(reply.messages.is_empty());
        assert_eq!(reply.output, "");
    }

    #[tokio::test]
    async fn invoke_round_trips_json() {
        // The fake runner drains stdin and answers with a fixed verdict.
        let runner = ExternalRunner {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"cat >/dev/null; printf '{"pass":true,"exit_status":0,"output":"ok"}'"#
                    .to_string(),
            ],
        };
        let data = json!({"command": "echo hi", "input": ""});
        let request = RunnerRequest {
            exercise_type: "code",
            exercise_data: &data,
        };
        let reply = runner
            .invoke(&request, &BTreeMap::new(), None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(reply.pass);
        assert_eq!(reply.exit_status, Some(0));
        assert_eq!(reply.output, "ok");
    }

    #[tokio::test]
    async fn garbage_output_is_a_runner_error() {
        let runner = ExternalRunner {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "cat >/dev/null; echo not-json".to_string()],
        };
        let data = json!({});
        let request = RunnerRequest {
            exercise_type: "code",
            exercise_data: &data,
        };
        let err = runner
            .invoke(&request, &BTreeMap::new(), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Runner(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_informational_only() {
        let runner = ExternalRunner {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"cat >/dev/null; printf '{"pass":false,"output":"wrong"}'; exit 7"#.to_string(),
            ],
        };
        let data = json!({});
        let request = RunnerRequest {
            exercise_type: "code",
            exercise_data: &data,
        };
        let reply = runner
            .invoke(&request, &BTreeMap::new(), None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!reply.pass);
        assert_eq!(reply.output, "wrong");
    }
}
