use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::Result;

/// Severity of an audit entry. Rendered in upper case in the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warning => "WARNING",
            AuditLevel::Error => "ERROR",
            AuditLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub message: String,
    pub data: Option<Value>,
}

impl AuditRecord {
    pub fn new(level: AuditLevel, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        }
    }

    /// One log-file entry: a timestamped line, followed by the structured
    /// data pretty-printed when present.
    pub fn render(&self) -> String {
        let header = format!(
            "{} [{}] {}",
            self.timestamp.to_rfc3339(),
            self.level,
            self.message
        );
        match &self.data {
            Some(data) => format!(
                "{}\nData: {}\n",
                header,
                serde_json::to_string_pretty(data).unwrap_or_else(|_| "<unserializable>".into())
            ),
            None => format!("{}\n", header),
        }
    }
}

/// Append-only sink for the audit trail. Safe for concurrent appenders: each
/// append writes one fully rendered entry.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;
}

/// File-backed audit sink, matching the webhook handler's on-disk log format.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        Ok(Self { path })
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(record.render().as_bytes()).await?;
        Ok(())
    }
}

/// Handle the components log through. Append failures are reported on the
/// tracing side and otherwise swallowed: a broken audit file must never take
/// down alert handling.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, level: AuditLevel, message: &str, data: Option<Value>) {
        let record = AuditRecord::new(level, message, data);
        if let Err(e) = self.sink.append(record).await {
            error!("Failed to write audit log entry: {}", e);
        }
    }

    pub async fn info(&self, message: &str, data: Option<Value>) {
        self.record(AuditLevel::Info, message, data).await;
    }

    pub async fn warning(&self, message: &str, data: Option<Value>) {
        self.record(AuditLevel::Warning, message, data).await;
    }

    pub async fn error(&self, message: &str, data: Option<Value>) {
        self.record(AuditLevel::Error, message, data).await;
    }

    pub async fn critical(&self, message: &str, data: Option<Value>) {
        self.record(AuditLevel::Critical, message, data).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory sink for asserting on audit entries in unit tests.
    #[derive(Default)]
    pub struct MemorySink {
        pub records: Mutex<Vec<AuditRecord>>,
    }

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn append(&self, record: AuditRecord) -> Result<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }
}
