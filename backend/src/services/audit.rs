//! Append-only audit log of mutating business actions
//!
//! Records are JSON lines in
//! `{log_dir}/{action}/{entity}/{YYMMDD-T-HHMMSS}_{actor}_{entityId}.log`.
//! Writes are best effort: a failed write never undoes the business change,
//! it is reported to the error log and surfaced as a log reference instead.

use std::path::{Path, PathBuf};

use axum::http::StatusCode;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use shared::{AuditAction, DocumentKind};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, AppResult};
use crate::error_log;

/// One audit record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Local>,
    pub action: AuditAction,
    pub entity: String,
    /// User name, not id, so the files read on their own
    pub actor: String,
    pub entity_id: i32,
    pub payload: Value,
}

/// File-backed audit log
#[derive(Clone, Debug)]
pub struct AuditLog {
    root: PathBuf,
}

impl AuditLog {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            root: log_dir.to_path_buf(),
        }
    }

    fn path_for(&self, record: &AuditRecord) -> PathBuf {
        let actor: String = record
            .actor
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        self.root
            .join(record.action.as_str())
            .join(&record.entity)
            .join(format!(
                "{}_{}_{}.log",
                record.timestamp.format("%y%m%d-T-%H%M%S"),
                actor,
                record.entity_id
            ))
    }

    /// Append one record
    pub async fn append(&self, record: &AuditRecord) -> AppResult<()> {
        let path = self.path_for(record);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::AuditWrite(e.to_string()))?;
        }

        let mut line =
            serde_json::to_string(record).map_err(|e| AppError::AuditWrite(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AppError::AuditWrite(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::AuditWrite(e.to_string()))?;

        Ok(())
    }
}

/// Audit records collected while a command runs, written once it commits
#[derive(Debug, Default)]
pub struct AuditTrail {
    records: Vec<AuditRecord>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T: Serialize>(
        &mut self,
        action: AuditAction,
        entity: &str,
        actor: &str,
        entity_id: i32,
        payload: &T,
    ) {
        // keep the record even when the payload cannot be serialized
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    "audit payload for {} #{} not serializable: {}",
                    entity,
                    entity_id,
                    e
                );
                Value::Null
            }
        };
        self.records.push(AuditRecord {
            timestamp: Local::now(),
            action,
            entity: entity.to_string(),
            actor: actor.to_string(),
            entity_id,
            payload,
        });
    }

    pub fn document<T: Serialize>(
        &mut self,
        action: AuditAction,
        kind: DocumentKind,
        actor: &str,
        entity_id: i32,
        payload: &T,
    ) {
        self.record(action, kind.entity(), actor, entity_id, payload);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write every record in order. Failures are logged and returned as
    /// error-log file names for the response envelope.
    pub async fn flush(self, log: &AuditLog) -> Vec<String> {
        let mut error_logs = Vec::new();
        for record in &self.records {
            if let Err(e) = log.append(record).await {
                tracing::warn!(
                    "audit write failed for {} {} #{}: {}",
                    record.action.as_str(),
                    record.entity,
                    record.entity_id,
                    e
                );
                let name = error_log::write(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AUDIT_WRITE_ERROR",
                    &e.to_string(),
                );
                error_logs.extend(name);
            }
        }
        error_logs
    }
}
