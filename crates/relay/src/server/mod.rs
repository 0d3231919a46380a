mod routes;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{audit::AuditLog, config::Config, runner::RemediationRunner, RelayError};

pub struct Server {
    audit: AuditLog,
    runner: RemediationRunner,
    started: Instant,
}

impl Server {
    pub fn new(_config: &Config, audit: AuditLog, runner: RemediationRunner) -> Self {
        Self {
            audit,
            runner,
            started: Instant::now(),
        }
    }

    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/rollback", post(routes::rollback))
            .route("/critical", post(routes::critical))
            .route("/general", post(routes::general))
            .route("/default", post(routes::default_webhook))
            .route("/health", get(routes::health))
            .route("/status", get(routes::status))
            .fallback(routes::not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn start(self, addr: &str) -> crate::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        // Connect info feeds the delivery source recorded on webhook receipt.
        axum::serve(
            listener,
            self.build_router()
                .into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn runner(&self) -> &RemediationRunner {
        &self.runner
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, shutting down gracefully");
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": reason })),
            )
                .into_response(),
            other => {
                error!("Internal server error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "success": false,
                        "error": "Internal server error",
                        "timestamp": Utc::now().to_rfc3339(),
                    })),
                )
                    .into_response()
            }
        }
    }
}
