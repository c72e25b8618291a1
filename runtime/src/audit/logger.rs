//! JSONL audit logger: one line per controller operation.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// A single audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub duration_ms: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only JSONL audit logger.
///
/// Credentials never reach the journal; proxies are recorded as `host:port`.
pub struct AuditLogger {
    file: Mutex<File>,
}

impl AuditLogger {
    /// Open or create the journal.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log: {}", path.display()))?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn log(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log lock poisoned"))?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    /// Record an operation outcome with timing.
    pub fn log_operation(
        &self,
        operation: &str,
        proxy: Option<&str>,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<()> {
        self.log(&AuditEvent {
            timestamp: Utc::now().to_rfc3339(),
            operation: operation.to_string(),
            proxy: proxy.map(String::from),
            duration_ms,
            status: if error.is_some() { "error" } else { "ok" }.to_string(),
            error: error.map(String::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::open(&path).unwrap();
        logger
            .log_operation("activateProxy", Some("1.2.3.4:8080"), 12, None)
            .unwrap();
        logger
            .log_operation("activateHeaders", None, 3, Some("activate the proxy first"))
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let events: Vec<AuditEvent> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "ok");
        assert_eq!(events[0].proxy.as_deref(), Some("1.2.3.4:8080"));
        assert_eq!(events[1].status, "error");
        assert!(!text.contains("password"));
    }
}
