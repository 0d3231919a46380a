use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Excess invocations wait for a free slot.
    #[serde(rename = "queue")]
    Queue,
    /// Excess invocations are dropped with an audit entry.
    #[serde(rename = "reject")]
    Reject,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Queue
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub audit: AuditConfig,
    pub remediation: RemediationConfig,
    pub escalation: EscalationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Path to the rollback executable. Receives the webhook payload on stdin.
    pub script_path: PathBuf,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl RemediationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Secondary notification endpoint for failed rollbacks. Escalation is
    /// disabled when unset.
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Config {
            server: ServerConfig {
                addr: std::env::var("SERVER_ADDR")
                    .unwrap_or_else(|_| "0.0.0.0:8090".to_string()),
            },
            audit: AuditConfig {
                log_file: std::env::var("AUDIT_LOG_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        PathBuf::from("/var/log/webhook/rollback-relay.log")
                    }),
            },
            remediation: RemediationConfig {
                script_path: std::env::var("ROLLBACK_SCRIPT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/scripts/webhook-rollback.sh")),
                timeout_secs: std::env::var("ROLLBACK_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
                max_concurrent: std::env::var("MAX_CONCURRENT_ROLLBACKS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8),
                overflow: match std::env::var("OVERFLOW_POLICY")
                    .unwrap_or_else(|_| "queue".to_string())
                    .to_lowercase()
                    .as_str()
                {
                    "reject" => OverflowPolicy::Reject,
                    _ => OverflowPolicy::Queue,
                },
            },
            escalation: EscalationConfig {
                webhook_url: std::env::var("EMERGENCY_WEBHOOK_URL")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
        };

        if config.remediation.timeout_secs == 0 {
            return Err(crate::RelayError::Config(
                "ROLLBACK_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if config.remediation.max_concurrent == 0 {
            return Err(crate::RelayError::Config(
                "MAX_CONCURRENT_ROLLBACKS must be greater than zero".to_string(),
            ));
        }
        if config.escalation.webhook_url.is_none() {
            tracing::warn!(
                "EMERGENCY_WEBHOOK_URL is not set. Failed rollbacks will not be escalated."
            );
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8090".to_string(),
            },
            audit: AuditConfig {
                log_file: PathBuf::from("/var/log/webhook/rollback-relay.log"),
            },
            remediation: RemediationConfig {
                script_path: PathBuf::from("/scripts/webhook-rollback.sh"),
                timeout_secs: 30,
                max_concurrent: 8,
                overflow: OverflowPolicy::Queue,
            },
            escalation: EscalationConfig { webhook_url: None },
        }
    }
}
