use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rollback_relay::{
    audit::{AuditLog, FileAuditSink},
    config::Config,
    runner::RemediationRunner,
    server::Server,
    Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Fail-fast on uncaught faults: log, then terminate. Applies to panics on
    // any task, request-handling or not.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Uncaught fault, terminating: {}", panic_info);
        default_hook(panic_info);
        std::process::exit(1);
    }));

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);

    // Initialize the audit trail
    let sink = Arc::new(FileAuditSink::new(&config.audit.log_file).await?);
    let audit = AuditLog::new(sink);

    // Initialize the remediation pipeline
    let runner = RemediationRunner::new(&config, audit.clone());

    // Initialize server
    let server = Server::new(&config, audit.clone(), runner);

    info!("🚀 Webhook handler listening on {}", config.server.addr);
    info!("Audit log file: {}", config.audit.log_file.display());
    audit
        .info(
            &format!("🚀 Webhook handler server started on {}", config.server.addr),
            None,
        )
        .await;

    server.start(&config.server.addr).await?;

    audit.info("Server closed", None).await;
    Ok(())
}
