use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RemediationConfig;

/// How long a killed invocation keeps reading, so bytes the child wrote
/// before the kill still land in the outcome.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Terminal classification of one remediation invocation. Exactly one is
/// produced per invocation; the timer-vs-exit race inside
/// [`ProcessSupervisor::run`] cannot yield two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        stdout: String,
        stderr: String,
    },
    Failure {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// The deadline fired first; output collected up to the kill is kept.
    TimedOut {
        stdout: String,
        stderr: String,
    },
    /// The action never started (executable missing, permission denied, ...).
    SpawnError {
        cause: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Short human-readable failure description, used in escalation messages.
    pub fn describe(&self) -> String {
        match self {
            Outcome::Success { .. } => "completed successfully".to_string(),
            Outcome::Failure { exit_code, .. } => {
                format!("Rollback failed with code {}", exit_code)
            }
            Outcome::TimedOut { .. } => "Rollback script timeout".to_string(),
            Outcome::SpawnError { cause } => {
                format!("Failed to execute rollback script: {}", cause)
            }
        }
    }

    /// Captured diagnostics as structured audit data.
    pub fn diagnostics(&self) -> Value {
        match self {
            Outcome::Success { stdout, stderr } => json!({
                "stdout": stdout,
                "stderr": stderr,
            }),
            Outcome::Failure {
                exit_code,
                stdout,
                stderr,
            } => json!({
                "code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
            }),
            Outcome::TimedOut { stdout, stderr } => json!({
                "error": "Rollback script timeout",
                "stdout": stdout,
                "stderr": stderr,
            }),
            Outcome::SpawnError { cause } => json!({
                "error": cause,
            }),
        }
    }
}

/// One execution of the rollback action, from spawn to terminal outcome.
#[derive(Debug)]
pub struct RemediationInvocation {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Owns the lifecycle of a single rollback-action child process: spawn, feed
/// the payload on stdin, drain stdout/stderr, and race natural exit against
/// the configured deadline.
pub struct ProcessSupervisor {
    config: RemediationConfig,
    escalation_url: Option<String>,
}

impl ProcessSupervisor {
    pub fn new(config: RemediationConfig, escalation_url: Option<String>) -> Self {
        Self {
            config,
            escalation_url,
        }
    }

    pub async fn run(&self, payload: &Value) -> RemediationInvocation {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        info!(
            invocation = %id,
            script = %self.config.script_path.display(),
            "Executing rollback script"
        );
        let outcome = self.run_child(id, payload).await;

        RemediationInvocation {
            id,
            started_at,
            duration: clock.elapsed(),
            outcome,
        }
    }

    async fn run_child(&self, id: Uuid, payload: &Value) -> Outcome {
        let mut cmd = Command::new(&self.config.script_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The action may self-report to the escalation channel.
        if let Some(url) = &self.escalation_url {
            cmd.env("EMERGENCY_WEBHOOK_URL", url);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(invocation = %id, "Failed to spawn rollback script: {}", e);
                return Outcome::SpawnError {
                    cause: e.to_string(),
                };
            }
        };
        // Deadline counts from the spawn, not from stdin delivery.
        let deadline = Instant::now() + self.config.timeout();

        if let Some(mut stdin) = child.stdin.take() {
            let body = payload.to_string().into_bytes();
            tokio::spawn(async move {
                // An early-exiting child closes the pipe under us; that is
                // its business, the exit code tells the rest.
                if let Err(e) = stdin.write_all(&body).await {
                    warn!("Failed to deliver payload to rollback script: {}", e);
                }
            });
        }

        let stdout_task = collect_stream(child.stdout.take());
        let stderr_task = collect_stream(child.stderr.take());

        tokio::select! {
            status = child.wait() => {
                // Drain both pipes fully before classifying; wait() can
                // return while buffered output is still in flight.
                let stdout = stdout_task.drain().await;
                let stderr = stderr_task.drain().await;
                match status {
                    Ok(status) if status.success() => Outcome::Success { stdout, stderr },
                    Ok(status) => Outcome::Failure {
                        exit_code: status.code().unwrap_or(-1),
                        stdout,
                        stderr,
                    },
                    Err(e) => {
                        warn!(invocation = %id, "Failed to reap rollback script: {}", e);
                        Outcome::Failure { exit_code: -1, stdout, stderr }
                    }
                }
            }
            _ = sleep_until(deadline) => {
                info!(invocation = %id, "Rollback script deadline expired, killing process");
                if let Err(e) = child.kill().await {
                    warn!(invocation = %id, "Failed to kill timed-out rollback script: {}", e);
                }
                // The kill made the outcome final: take what was captured and
                // stop reading, even if orphans of the script keep the pipes
                // open.
                let stdout = stdout_task.snapshot().await;
                let stderr = stderr_task.snapshot().await;
                Outcome::TimedOut { stdout, stderr }
            }
        }
    }
}

/// Collects one output stream into a shared buffer, so a killed invocation
/// can take what was captured without waiting for pipe EOF.
struct StreamCollector {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StreamCollector {
    /// Full drain to EOF, for children that exited naturally.
    async fn drain(self) -> String {
        let _ = self.task.await;
        let buf = self.buf.lock().await;
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Post-kill finalization: a short grace lets already-written bytes land,
    /// then reading stops for good. Anything a surviving orphan writes later
    /// is not accepted.
    async fn snapshot(mut self) -> String {
        if timeout(KILL_DRAIN_GRACE, &mut self.task).await.is_err() {
            self.task.abort();
        }
        let buf = self.buf.lock().await;
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn collect_stream<R>(stream: Option<R>) -> StreamCollector
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = buf.clone();
    let task = tokio::spawn(async move {
        let mut stream = match stream {
            Some(stream) => stream,
            None => return,
        };
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    });
    StreamCollector { buf, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OverflowPolicy, RemediationConfig};
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn write_script(body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rollback-{}.sh", Uuid::new_v4()));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config_for(path: PathBuf, timeout_secs: u64) -> RemediationConfig {
        RemediationConfig {
            script_path: path,
            timeout_secs,
            max_concurrent: 4,
            overflow: OverflowPolicy::Queue,
        }
    }

    #[tokio::test]
    async fn zero_exit_is_success_with_captured_output() {
        let script = write_script("cat > /dev/null\necho rolled back\necho note >&2\nexit 0");
        let supervisor = ProcessSupervisor::new(config_for(script.clone(), 10), None);

        let invocation = supervisor.run(&json!({"alerts": []})).await;
        match invocation.outcome {
            Outcome::Success { stdout, stderr } => {
                assert_eq!(stdout, "rolled back\n");
                assert_eq!(stderr, "note\n");
            }
            other => panic!("expected Success, got {:?}", other),
        }
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn payload_is_delivered_on_stdin() {
        let script = write_script("cat");
        let supervisor = ProcessSupervisor::new(config_for(script.clone(), 10), None);

        let payload = json!({"alerts": [{"labels": {"alertname": "X"}, "annotations": {}}]});
        let invocation = supervisor.run(&payload).await;
        match invocation.outcome {
            Outcome::Success { stdout, .. } => {
                let echoed: Value = serde_json::from_str(&stdout).unwrap();
                assert_eq!(echoed, payload);
            }
            other => panic!("expected Success, got {:?}", other),
        }
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_code() {
        let script = write_script("echo boom >&2\nexit 3");
        let supervisor = ProcessSupervisor::new(config_for(script.clone(), 10), None);

        let invocation = supervisor.run(&json!({})).await;
        match invocation.outcome {
            Outcome::Failure {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("expected Failure, got {:?}", other),
        }
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn deadline_kills_process_and_keeps_partial_output() {
        let script = write_script("echo started\nsleep 30\necho finished");
        let supervisor = ProcessSupervisor::new(config_for(script.clone(), 1), None);

        let invocation = supervisor.run(&json!({})).await;
        // Well under the script's 30s sleep: the kill actually happened.
        assert!(invocation.duration < Duration::from_secs(5));
        match invocation.outcome {
            Outcome::TimedOut { stdout, .. } => {
                assert_eq!(stdout, "started\n");
                assert!(!stdout.contains("finished"));
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn kill_finalizes_outcome_despite_surviving_orphans() {
        // The backgrounded subshell inherits the stdout pipe and outlives the
        // kill; its output must not reach the outcome, and the outcome must
        // not wait for it to exit.
        let script = write_script("echo early\n( sleep 3; echo late ) &\nsleep 30");
        let supervisor = ProcessSupervisor::new(config_for(script.clone(), 1), None);

        let invocation = supervisor.run(&json!({})).await;
        assert!(
            invocation.duration < Duration::from_secs(2),
            "outcome not finalized promptly after the deadline: {:?}",
            invocation.duration
        );
        match invocation.outcome {
            Outcome::TimedOut { stdout, .. } => {
                assert_eq!(stdout, "early\n");
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let config = config_for(PathBuf::from("/nonexistent/rollback.sh"), 10);
        let supervisor = ProcessSupervisor::new(config, None);

        let invocation = supervisor.run(&json!({})).await;
        assert!(matches!(invocation.outcome, Outcome::SpawnError { .. }));
    }

    #[tokio::test]
    async fn escalation_url_is_exported_to_child() {
        let script = write_script("printf '%s' \"$EMERGENCY_WEBHOOK_URL\"");
        let supervisor = ProcessSupervisor::new(
            config_for(script.clone(), 10),
            Some("http://hooks.example/emergency".to_string()),
        );

        let invocation = supervisor.run(&json!({})).await;
        match invocation.outcome {
            Outcome::Success { stdout, .. } => {
                assert_eq!(stdout, "http://hooks.example/emergency");
            }
            other => panic!("expected Success, got {:?}", other),
        }
        let _ = std::fs::remove_file(script);
    }
}
