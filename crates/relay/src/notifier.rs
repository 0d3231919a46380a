use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::audit::AuditLog;
use crate::supervisor::RemediationInvocation;

/// Turns a terminal [`RemediationInvocation`] into audit entries and, on
/// failure, a fire-and-forget escalation to the emergency webhook.
pub struct OutcomeNotifier {
    audit: AuditLog,
    escalation_url: Option<String>,
    client: reqwest::Client,
}

impl OutcomeNotifier {
    pub fn new(audit: AuditLog, escalation_url: Option<String>) -> Self {
        Self {
            audit,
            escalation_url,
            client: reqwest::Client::new(),
        }
    }

    /// Consumes exactly one invocation outcome. The HTTP response to the
    /// alert source was sent long before this runs, so nothing here can (or
    /// may) propagate back to the caller.
    pub async fn report(&self, invocation: &RemediationInvocation) {
        let mut data = invocation.outcome.diagnostics();
        if let Some(map) = data.as_object_mut() {
            map.insert("invocation".into(), json!(invocation.id.to_string()));
            map.insert(
                "durationMs".into(),
                json!(invocation.duration.as_millis() as u64),
            );
        }

        if invocation.outcome.is_success() {
            self.audit
                .critical("✅ Rollback execution successful", Some(data))
                .await;
            return;
        }

        self.audit
            .critical("❌ Rollback execution failed", Some(data))
            .await;
        self.escalate(invocation.outcome.describe());
    }

    /// Detached delivery: the result is only ever logged, never joined.
    fn escalate(&self, cause: String) {
        let url = match &self.escalation_url {
            Some(url) => url.clone(),
            None => return,
        };

        let client = self.client.clone();
        let audit = self.audit.clone();
        let body = json!({
            "text": format!(
                "🆘 ROLLBACK FAILED - MANUAL INTERVENTION REQUIRED\nError: {}\nTime: {}",
                cause,
                Utc::now().to_rfc3339()
            )
        });

        tokio::spawn(async move {
            let delivery = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            match delivery {
                Ok(_) => info!("Escalation delivered to emergency webhook"),
                Err(e) => {
                    error!("Emergency webhook failed: {}", e);
                    audit
                        .error("Emergency webhook failed", Some(json!({"error": e.to_string()})))
                        .await;
                }
            }
        });
    }
}
