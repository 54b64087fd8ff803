//! Audit trail
//!
//! Appends one JSON line per wallet or confirmation-flow event. Entries carry
//! public data only (addresses, chains, amounts, hashes), never key material.
//! Write failures are logged and never fail the operation being audited.

use crate::chains::Chain;
use crate::UserId;
use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Entry in the audit log
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    timestamp: DateTime<Utc>,
    event: &'static str,
    user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain: Option<Chain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Value::is_null")]
    details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AuditEvent {
    pub fn new(event: &'static str, user_id: UserId) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            user_id,
            action_id: None,
            chain: None,
            address: None,
            tx_hash: None,
            details: Value::Null,
            error: None,
        }
    }

    pub fn action(mut self, id: Uuid) -> Self {
        self.action_id = Some(id);
        self
    }

    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn tx_hash(mut self, hash: B256) -> Self {
        self.tx_hash = Some(hash);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn error(mut self, error: &crate::Error) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Writer for audit log entries
struct AuditLogWriter {
    path: PathBuf,
}

impl AuditLogWriter {
    async fn write(&self, entry: &AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Append-only JSONL audit log; a disabled log drops every event
#[derive(Clone)]
pub struct AuditLog {
    writer: Option<Arc<Mutex<AuditLogWriter>>>,
}

impl AuditLog {
    /// Create a new audit log
    ///
    /// # Arguments
    /// * `log_path` - Path to the audit log file (JSONL format)
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Some(Arc::new(Mutex::new(AuditLogWriter {
                path: log_path.into(),
            }))),
        }
    }

    pub fn disabled() -> Self {
        Self { writer: None }
    }

    pub async fn record(&self, event: AuditEvent) {
        let Some(writer) = &self.writer else {
            return;
        };

        let writer = writer.lock().await;
        if let Err(e) = writer.write(&event).await {
            tracing::warn!(error = %e, event = event.event, "Failed to write audit log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_logs_events_as_jsonl() {
        let temp_file = NamedTempFile::new().unwrap();
        let log = AuditLog::new(temp_file.path());

        let action = Uuid::new_v4();
        log.record(
            AuditEvent::new("intent_created", 42)
                .action(action)
                .chain(Chain::Base)
                .details(json!({ "kind": "buy", "amount_in": "10000000000000000" })),
        )
        .await;
        log.record(
            AuditEvent::new("action_failed", 42)
                .action(action)
                .error(&crate::Error::QuoteExpired),
        )
        .await;

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "intent_created");
        assert_eq!(lines[0]["chain"], "base");
        assert_eq!(lines[0]["user_id"], 42);
        assert!(lines[0].get("error").is_none());
        assert_eq!(lines[1]["action_id"], action.to_string());
        assert!(lines[1]["error"].as_str().unwrap().contains("expired"));
    }

    #[tokio::test]
    async fn test_disabled_log_writes_nothing() {
        let log = AuditLog::disabled();
        log.record(AuditEvent::new("wallet_created", 1)).await;
    }
}
