use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::audit::AuditLog;
use crate::config::{Config, OverflowPolicy};
use crate::notifier::OutcomeNotifier;
use crate::supervisor::ProcessSupervisor;

/// Dispatches accepted webhook payloads into detached remediation
/// invocations, bounded by a counting semaphore. The HTTP response never
/// waits on anything here.
pub struct RemediationRunner {
    supervisor: Arc<ProcessSupervisor>,
    notifier: Arc<OutcomeNotifier>,
    permits: Arc<Semaphore>,
    overflow: OverflowPolicy,
    audit: AuditLog,
}

impl RemediationRunner {
    pub fn new(config: &Config, audit: AuditLog) -> Self {
        let supervisor = ProcessSupervisor::new(
            config.remediation.clone(),
            config.escalation.webhook_url.clone(),
        );
        let notifier = OutcomeNotifier::new(audit.clone(), config.escalation.webhook_url.clone());
        Self {
            supervisor: Arc::new(supervisor),
            notifier: Arc::new(notifier),
            permits: Arc::new(Semaphore::new(config.remediation.max_concurrent)),
            overflow: config.remediation.overflow.clone(),
            audit,
        }
    }

    /// Starts one invocation for an already-acknowledged payload. Under the
    /// `queue` policy excess deliveries wait for a slot inside the detached
    /// task; under `reject` they are dropped with an audit entry.
    pub fn dispatch(&self, payload: Value) {
        let supervisor = self.supervisor.clone();
        let notifier = self.notifier.clone();
        let permits = self.permits.clone();

        match self.overflow {
            OverflowPolicy::Reject => match permits.try_acquire_owned() {
                Ok(permit) => {
                    tokio::spawn(async move {
                        let invocation = supervisor.run(&payload).await;
                        notifier.report(&invocation).await;
                        drop(permit);
                    });
                }
                Err(_) => {
                    warn!("Concurrent rollback limit reached, dropping delivery");
                    let audit = self.audit.clone();
                    tokio::spawn(async move {
                        audit
                            .error(
                                "Rollback dropped: concurrent invocation limit reached",
                                Some(json!({"alerts": crate::alert::alert_count(&payload)})),
                            )
                            .await;
                    });
                }
            },
            OverflowPolicy::Queue => {
                tokio::spawn(async move {
                    let permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return, // semaphore closed, shutting down
                    };
                    let invocation = supervisor.run(&payload).await;
                    notifier.report(&invocation).await;
                    drop(permit);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::MemorySink;
    use crate::config::RemediationConfig;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    /// Script that appends one line to a marker file, then holds its slot.
    fn counting_script(marker: &PathBuf) -> PathBuf {
        let path = std::env::temp_dir().join(format!("runner-{}.sh", Uuid::new_v4()));
        let body = format!("#!/bin/sh\necho ran >> {}\nsleep 1\n", marker.display());
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config_with(script: PathBuf, overflow: OverflowPolicy) -> Config {
        let mut config = Config::default();
        config.remediation = RemediationConfig {
            script_path: script,
            timeout_secs: 10,
            max_concurrent: 1,
            overflow,
        };
        config
    }

    async fn runs_recorded(marker: &PathBuf) -> usize {
        tokio::fs::read_to_string(marker)
            .await
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn reject_policy_drops_excess_deliveries() {
        let marker = std::env::temp_dir().join(format!("marker-{}", Uuid::new_v4()));
        let script = counting_script(&marker);
        let sink = Arc::new(MemorySink::default());
        let runner = RemediationRunner::new(
            &config_with(script.clone(), OverflowPolicy::Reject),
            AuditLog::new(sink.clone()),
        );

        runner.dispatch(serde_json::json!({"alerts": [1]}));
        tokio::time::sleep(Duration::from_millis(200)).await;
        runner.dispatch(serde_json::json!({"alerts": [1]}));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(runs_recorded(&marker).await, 1);
        let records = sink.records.lock().unwrap();
        assert!(records
            .iter()
            .any(|r| r.message.contains("Rollback dropped")));
        drop(records);
        let _ = std::fs::remove_file(script);
        let _ = std::fs::remove_file(marker);
    }

    #[tokio::test]
    async fn queue_policy_eventually_runs_everything() {
        let marker = std::env::temp_dir().join(format!("marker-{}", Uuid::new_v4()));
        let script = counting_script(&marker);
        let sink = Arc::new(MemorySink::default());
        let runner = RemediationRunner::new(
            &config_with(script.clone(), OverflowPolicy::Queue),
            AuditLog::new(sink),
        );

        runner.dispatch(serde_json::json!({"alerts": [1]}));
        runner.dispatch(serde_json::json!({"alerts": [1]}));

        // Two sequential one-second runs behind a single permit.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(runs_recorded(&marker).await, 2);
        let _ = std::fs::remove_file(script);
        let _ = std::fs::remove_file(marker);
    }
}
