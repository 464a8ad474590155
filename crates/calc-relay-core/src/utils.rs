use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Audit Logging ==============

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub source_chat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_chat: Option<i64>,
    pub scope: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    pub fn calculation(
        user_id: Option<i64>,
        source_chat: i64,
        destination_chat: i64,
        scope: &str,
        command: &str,
        old_value: f64,
        new_value: f64,
    ) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: "calculation".to_string(),
            user_id,
            source_chat,
            destination_chat: Some(destination_chat),
            scope: scope.to_string(),
            command: Some(command.to_string()),
            old_value: Some(old_value),
            new_value: Some(new_value),
            reason: None,
        }
    }

    pub fn rejected(
        user_id: Option<i64>,
        source_chat: i64,
        scope: &str,
        command: &str,
        reason: &str,
    ) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: "rejected".to_string(),
            user_id,
            source_chat,
            destination_chat: None,
            scope: scope.to_string(),
            command: Some(command.to_string()),
            old_value: None,
            new_value: None,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, event: &AuditEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
