use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity attached to an event by its producer.
///
/// Levels outside the well-known set are kept verbatim in `Other` so a
/// record never fails to decode just because a producer invented a level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Other(String),
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Other(s) => s,
        }
    }
}

impl From<String> for LogLevel {
    fn from(s: String) -> Self {
        // Exact match only: "warn" is not "WARN".
        match s.as_str() {
            "TRACE" => LogLevel::Trace,
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            "FATAL" => LogLevel::Fatal,
            _ => LogLevel::Other(s),
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        LogLevel::from(s.to_string())
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned when a record is rejected at the ingestion boundary
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field '{0}' is missing or empty")]
    MissingField(&'static str),
}

/// A single structured event as published by a producer.
///
/// Records travel through the queue as camelCase JSON. PascalCase keys are
/// accepted on input as well since some producers serialise that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "ServiceName")]
    pub service_name: String,
    #[serde(alias = "LogLevel")]
    pub log_level: LogLevel,
    #[serde(alias = "EventType")]
    pub event_type: String,
    #[serde(alias = "SourceIp")]
    pub source_ip: String,
    #[serde(alias = "UserId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(alias = "HttpMethod", default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(alias = "Endpoint", default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(alias = "ResponseTimeMs", default)]
    pub response_time_ms: u32,
    #[serde(alias = "Message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventRecord {
    /// Decode a queue message body
    pub fn from_json_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Encode as the UTF-8 JSON body published to the queue
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Check the fields the pipeline relies on before a record is enqueued
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("id", &self.id),
            ("serviceName", &self.service_name),
            ("eventType", &self.event_type),
            ("sourceIp", &self.source_ip),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(name));
            }
        }
        Ok(())
    }
}
