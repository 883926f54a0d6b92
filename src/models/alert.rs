use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raised once per window when a source crosses the failure threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub source_ip: String,
    pub triggering_count: u64,
    pub detection_timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(source_ip: impl Into<String>, triggering_count: u64) -> Self {
        Alert {
            source_ip: source_ip.into(),
            triggering_count,
            detection_timestamp: Utc::now(),
        }
    }
}
