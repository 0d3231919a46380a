use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{RelayError, Result};

/// Alertmanager webhook payload. The relay forwards the raw JSON body to the
/// rollback action, so this typed view is only used for logging; lenient
/// defaults keep ack-only routes working on sparse payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(rename = "groupLabels", default)]
    pub group_labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl AlertPayload {
    /// Lenient view of a raw payload for logging. Never fails: anything that
    /// does not fit the shape collapses to empty collections.
    pub fn lenient(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or(Self {
            alerts: Vec::new(),
            group_labels: HashMap::new(),
        })
    }
}

/// Number of entries under `alerts`, tolerating any payload shape.
pub fn alert_count(payload: &Value) -> usize {
    payload
        .get("alerts")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Shallow validation of an untrusted webhook body, in checked order:
/// the `alerts` array must exist, must be non-empty, and its first entry must
/// carry `labels` and `annotations` objects. Deeper entries are deliberately
/// not inspected.
pub fn validate(payload: &Value) -> Result<()> {
    let alerts = match payload.get("alerts").and_then(Value::as_array) {
        Some(alerts) => alerts,
        None => {
            return Err(RelayError::Validation(
                "Invalid webhook format: missing alerts array".to_string(),
            ))
        }
    };

    if alerts.is_empty() {
        return Err(RelayError::Validation(
            "No alerts in webhook data".to_string(),
        ));
    }

    let first = &alerts[0];
    let has_labels = first.get("labels").is_some_and(Value::is_object);
    let has_annotations = first.get("annotations").is_some_and(Value::is_object);
    if !has_labels || !has_annotations {
        return Err(RelayError::Validation(
            "Alert missing required labels or annotations".to_string(),
        ));
    }

    Ok(())
}
