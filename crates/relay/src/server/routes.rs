use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode, Uri},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use super::Server;
use crate::alert::{self, AlertPayload};
use crate::{RelayError, Result};

/// Matches the 10mb body cap the upstream alert source is configured against.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

fn ack(message: &str) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Primary remediation trigger. Acknowledges the alert source immediately;
/// the rollback itself runs as a detached invocation and its outcome is
/// reported out-of-band.
pub async fn rollback(
    State(server): State<Arc<Server>>,
    request: Request,
) -> Result<Json<Value>> {
    // Peer address is only present when served with connect info.
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    // A body that is not JSON at all (or unreadable, or oversized) is handled
    // like any other malformed payload, not as a server fault.
    let body = axum::body::to_bytes(request.into_body(), BODY_LIMIT)
        .await
        .unwrap_or_default();
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    server
        .audit()
        .critical(
            "🚨 Auto-rollback webhook received",
            Some(json!({
                "source": source,
                "alertCount": alert::alert_count(&payload),
                "groupLabels": payload.get("groupLabels").cloned().unwrap_or(Value::Null),
            })),
        )
        .await;

    if let Err(e) = alert::validate(&payload) {
        let reason = match &e {
            RelayError::Validation(reason) => reason.clone(),
            other => other.to_string(),
        };
        server
            .audit()
            .error("Invalid webhook data", Some(json!({ "error": reason })))
            .await;
        return Err(e);
    }

    // Respond first; the alert source enforces its own short timeout and the
    // rollback may run far longer.
    server.runner().dispatch(payload);

    Ok(ack("Rollback initiated"))
}

/// Critical alerts are acknowledged and audited per-alert, never remediated.
pub async fn critical(State(server): State<Arc<Server>>, body: String) -> Json<Value> {
    let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let view = AlertPayload::lenient(&payload);

    server
        .audit()
        .warning(
            "Critical alert webhook received",
            Some(json!({
                "alertCount": view.alerts.len(),
                "groupLabels": view.group_labels,
            })),
        )
        .await;

    for alert in &view.alerts {
        server
            .audit()
            .critical(
                "Critical Alert",
                Some(json!({
                    "name": alert.labels.get("alertname"),
                    "service": alert.labels.get("service"),
                    "summary": alert.annotations.get("summary"),
                    "description": alert.annotations.get("description"),
                })),
            )
            .await;
    }

    ack("Critical alert processed")
}

pub async fn general(State(server): State<Arc<Server>>, body: String) -> Json<Value> {
    let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    server
        .audit()
        .info(
            "General alert webhook received",
            Some(json!({ "alertCount": alert::alert_count(&payload) })),
        )
        .await;

    ack("General alert processed")
}

pub async fn default_webhook(State(server): State<Arc<Server>>) -> Json<Value> {
    server.audit().info("Default webhook received", None).await;
    ack("Default webhook processed")
}

pub async fn health(State(server): State<Arc<Server>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": server.uptime_secs(),
    }))
}

pub async fn status(State(server): State<Arc<Server>>) -> Json<Value> {
    info!("Status requested");
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": server.uptime_secs(),
        "memory": memory_usage(),
        "environment": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "family": std::env::consts::FAMILY,
        },
    }))
}

fn memory_usage() -> Value {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return Value::Null;
    };
    let mut sys = sysinfo::System::new();
    sys.refresh_process(pid);
    match sys.process(pid) {
        Some(process) => json!({
            "residentBytes": process.memory(),
            "virtualBytes": process.virtual_memory(),
        }),
        None => Value::Null,
    }
}

pub async fn not_found(
    State(server): State<Arc<Server>>,
    method: Method,
    uri: Uri,
) -> (StatusCode, Json<Value>) {
    warn!("404 Not Found: {} {}", method, uri.path());
    server
        .audit()
        .warning(&format!("404 Not Found: {} {}", method, uri.path()), None)
        .await;

    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Endpoint not found",
            "method": method.to_string(),
            "path": uri.path(),
        })),
    )
}
