//! Synthetic traffic for exercising the pipeline
//!
//! Produces ordinary service traffic with an occasional failure, and
//! brute-force bursts of failed logins from one attacker address.
//! Output is deterministic for a given sequence of calls.

use crate::models::{EventRecord, LogLevel};
use chrono::Utc;

const SERVICES: [&str; 4] = [
    "auth-service",
    "payment-service",
    "inventory-service",
    "frontend-gateway",
];
const USERS: [&str; 5] = [
    "admin",
    "jan_novak",
    "petr_svoboda",
    "guest_user",
    "system_internal",
];
const SOURCE_IPS: [&str; 4] = ["192.168.1.10", "192.168.1.11", "10.0.0.5", "172.16.0.23"];

/// One request in twenty fails
const FAILURE_EVERY: u64 = 20;

pub const DEFAULT_ATTACKER_IP: &str = "66.66.66.66";

/// Deterministic event source
pub struct TrafficGenerator {
    attacker_ip: String,
    seq: u64,
}

impl TrafficGenerator {
    pub fn new(attacker_ip: impl Into<String>) -> Self {
        TrafficGenerator {
            attacker_ip: attacker_ip.into(),
            seq: 0,
        }
    }

    fn endpoint_for(service: &str) -> &'static str {
        match service {
            "auth-service" => "/api/v1/login",
            "payment-service" => "/api/v1/process-payment",
            "inventory-service" => "/api/v1/check-stock",
            _ => "/api/v1/status",
        }
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("sim-{}-{}", Utc::now().timestamp_millis(), self.seq)
    }

    fn base_record(&mut self) -> EventRecord {
        let id = self.next_id();
        let n = self.seq as usize;
        let service = SERVICES[n % SERVICES.len()];

        EventRecord {
            id,
            timestamp: Utc::now(),
            service_name: service.to_string(),
            log_level: LogLevel::Info,
            event_type: "action_success".to_string(),
            source_ip: SOURCE_IPS[(n * 7) % SOURCE_IPS.len()].to_string(),
            user_id: Some(USERS[(n * 3) % USERS.len()].to_string()),
            http_method: Some(if n % 3 == 0 { "POST" } else { "GET" }.to_string()),
            endpoint: Some(Self::endpoint_for(service).to_string()),
            response_time_ms: 20 + ((n * 37) % 480) as u32,
            message: None,
        }
    }

    /// Next ordinary request
    pub fn normal(&mut self) -> EventRecord {
        let mut record = self.base_record();
        let endpoint = record.endpoint.clone().unwrap_or_default();

        if self.seq % FAILURE_EVERY == 0 {
            record.log_level = LogLevel::Error;
            record.event_type = "action_failed".to_string();
            record.message = Some(format!(
                "Exception occurred while processing request on {}. Connection timeout.",
                endpoint
            ));
        } else {
            record.message = Some(format!("Action processed successfully via {}", endpoint));
        }
        record
    }

    /// A run of failed logins from the attacker address
    pub fn attack_burst(&mut self, attempts: usize) -> Vec<EventRecord> {
        (0..attempts)
            .map(|i| {
                let mut record = self.base_record();
                record.source_ip = self.attacker_ip.clone();
                record.service_name = "auth-service".to_string();
                record.endpoint = Some("/api/v1/login".to_string());
                record.http_method = Some("POST".to_string());
                record.log_level = LogLevel::Warn;
                record.event_type = "login_failed".to_string();
                record.user_id = Some("admin".to_string());
                record.message = Some("Invalid password provided. Auth failed.".to_string());
                record.response_time_ms = 10 + ((i * 13) % 40) as u32;
                record
            })
            .collect()
    }
}

impl Default for TrafficGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACKER_IP)
    }
}
