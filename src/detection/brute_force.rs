//! Brute force detection on repeated authentication failures
//!
//! Counts failures per source IP inside a fixed window and raises a single
//! alert when a source reaches the threshold. Counts live in the
//! [`WindowCounterStore`], never in this struct, so any number of workers
//! can share one detector or run their own against the same store.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{CounterStoreConfig, DetectionConfig};
use crate::counter::{StoreError, WindowCounterStore};
use crate::models::{Alert, EventRecord, LogLevel};

/// What counts as a failure and how many of them raise an alert
#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub event_type: String,
    pub log_level: LogLevel,
    pub threshold: u64,
    pub window: Duration,
    pub key_prefix: String,
}

impl DetectionRule {
    pub fn from_config(detection: &DetectionConfig, store: &CounterStoreConfig) -> Self {
        DetectionRule {
            event_type: detection.event_type.clone(),
            log_level: LogLevel::from(detection.log_level.as_str()),
            threshold: detection.threshold,
            window: detection.window(),
            key_prefix: store.key_prefix.clone(),
        }
    }

    /// A record counts toward the threshold only if both type and level match
    pub fn matches(&self, record: &EventRecord) -> bool {
        record.event_type == self.event_type && record.log_level == self.log_level
    }

    /// Counter key for a source
    pub fn counter_key(&self, source_ip: &str) -> String {
        format!("{}{}", self.key_prefix, source_ip)
    }
}

impl Default for DetectionRule {
    fn default() -> Self {
        DetectionRule::from_config(&DetectionConfig::default(), &CounterStoreConfig::default())
    }
}

/// Per-source state implied by a counter value.
///
/// `Absent` is the state of a key the store has expired or never created;
/// application code never transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Absent,
    Counting(u64),
    Alerted,
}

impl WindowState {
    pub fn classify(count: u64, threshold: u64) -> Self {
        match count {
            0 => WindowState::Absent,
            n if n < threshold => WindowState::Counting(n),
            _ => WindowState::Alerted,
        }
    }
}

/// Windowed-threshold detector for failed logins
pub struct SecurityDetector {
    rule: DetectionRule,
    store: Arc<dyn WindowCounterStore>,
}

impl SecurityDetector {
    pub fn new(rule: DetectionRule, store: Arc<dyn WindowCounterStore>) -> Self {
        SecurityDetector { rule, store }
    }

    pub fn rule(&self) -> &DetectionRule {
        &self.rule
    }

    /// Evaluate one record.
    ///
    /// Non-matching records return `Ok(None)` without touching the store.
    /// A matching record increments its source's counter; the caller whose
    /// increment lands exactly on the threshold gets the alert, every other
    /// caller in the same window gets `None`.
    pub async fn evaluate(&self, record: &EventRecord) -> Result<Option<Alert>, StoreError> {
        if !self.rule.matches(record) {
            return Ok(None);
        }

        let key = self.rule.counter_key(&record.source_ip);
        let count = self.store.increment(&key, self.rule.window).await?;

        log::info!(
            "[watch] IP {} failures: {}/{}",
            record.source_ip,
            count,
            self.rule.threshold
        );

        if count == self.rule.threshold {
            return Ok(Some(Alert::new(record.source_ip.clone(), count)));
        }

        if let WindowState::Alerted = WindowState::classify(count, self.rule.threshold) {
            log::debug!(
                "IP {} already alerted in this window ({} failures)",
                record.source_ip,
                count
            );
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use async_trait::async_trait;
    use chrono::Utc;

    const ATTACKER: &str = "66.66.66.66";

    fn create_record(event_type: &str, level: LogLevel, ip: &str) -> EventRecord {
        EventRecord {
            id: format!("{}-{}", event_type, ip),
            timestamp: Utc::now(),
            service_name: "auth-service".to_string(),
            log_level: level,
            event_type: event_type.to_string(),
            source_ip: ip.to_string(),
            user_id: Some("admin".to_string()),
            http_method: Some("POST".to_string()),
            endpoint: Some("/api/v1/login".to_string()),
            response_time_ms: 20,
            message: None,
        }
    }

    fn failed_login(ip: &str) -> EventRecord {
        create_record("login_failed", LogLevel::Warn, ip)
    }

    fn create_detector() -> (SecurityDetector, Arc<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        let detector = SecurityDetector::new(DetectionRule::default(), store.clone());
        (detector, store)
    }

    async fn run(detector: &SecurityDetector, record: &EventRecord, times: usize) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for _ in 0..times {
            if let Some(alert) = detector.evaluate(record).await.unwrap() {
                alerts.push(alert);
            }
        }
        alerts
    }

    #[tokio::test]
    async fn test_below_threshold_no_alert() {
        let (detector, _) = create_detector();
        assert!(run(&detector, &failed_login(ATTACKER), 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_alert_on_threshold_event() {
        let (detector, _) = create_detector();
        let record = failed_login(ATTACKER);

        for _ in 0..4 {
            assert!(detector.evaluate(&record).await.unwrap().is_none());
        }
        let alert = detector.evaluate(&record).await.unwrap().expect("fifth failure alerts");
        assert_eq!(alert.source_ip, ATTACKER);
        assert_eq!(alert.triggering_count, 5);
    }

    #[tokio::test]
    async fn test_no_duplicate_alert_in_window() {
        let (detector, store) = create_detector();
        let alerts = run(&detector, &failed_login(ATTACKER), 12).await;

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].triggering_count, 5);
        assert_eq!(
            store.current("suspicious_ip:66.66.66.66").await.unwrap(),
            Some(12)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_counter() {
        let (detector, _) = create_detector();
        let record = failed_login(ATTACKER);

        assert_eq!(run(&detector, &record, 5).await.len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(run(&detector, &record, 4).await.is_empty());
        assert_eq!(run(&detector, &record, 1).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_failures_never_alert() {
        let (detector, _) = create_detector();
        let record = failed_login(ATTACKER);

        // Two failures per window, forever below threshold.
        for _ in 0..10 {
            assert!(run(&detector, &record, 2).await.is_empty());
            tokio::time::advance(Duration::from_secs(11)).await;
        }
    }

    #[tokio::test]
    async fn test_non_matching_events_ignored() {
        let (detector, store) = create_detector();

        let success = create_record("action_success", LogLevel::Info, ATTACKER);
        let wrong_level = create_record("login_failed", LogLevel::Error, ATTACKER);
        let wrong_type = create_record("action_failed", LogLevel::Warn, ATTACKER);
        let lowercase_level = create_record("login_failed", LogLevel::from("warn"), ATTACKER);

        assert!(run(&detector, &success, 100).await.is_empty());
        for record in [&wrong_level, &wrong_type, &lowercase_level] {
            assert!(run(&detector, record, 10).await.is_empty());
        }
        assert_eq!(store.live_keys(), 0);
    }

    #[tokio::test]
    async fn test_sources_are_counted_independently() {
        let (detector, _) = create_detector();
        let a = failed_login("10.0.0.1");
        let b = failed_login("10.0.0.2");

        for _ in 0..4 {
            assert!(detector.evaluate(&a).await.unwrap().is_none());
            assert!(detector.evaluate(&b).await.unwrap().is_none());
        }
        assert_eq!(detector.evaluate(&a).await.unwrap().unwrap().source_ip, "10.0.0.1");
        assert_eq!(detector.evaluate(&b).await.unwrap().unwrap().source_ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_custom_threshold_and_prefix() {
        let store = Arc::new(MemoryCounterStore::new());
        let rule = DetectionRule {
            threshold: 3,
            key_prefix: "bf:".to_string(),
            ..DetectionRule::default()
        };
        let detector = SecurityDetector::new(rule, store.clone());

        let alerts = run(&detector, &failed_login(ATTACKER), 3).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].triggering_count, 3);
        assert_eq!(store.current("bf:66.66.66.66").await.unwrap(), Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_evaluations_alert_once() {
        let (detector, _) = create_detector();
        let detector = Arc::new(detector);
        let mut handles = Vec::new();

        for _ in 0..5 {
            let detector = detector.clone();
            handles.push(tokio::spawn(async move {
                detector.evaluate(&failed_login(ATTACKER)).await.unwrap()
            }));
        }

        let mut alerts = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);
    }

    struct UnreachableStore;

    #[async_trait]
    impl WindowCounterStore for UnreachableStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn current(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_only_for_matching() {
        let detector = SecurityDetector::new(DetectionRule::default(), Arc::new(UnreachableStore));

        assert!(detector.evaluate(&failed_login(ATTACKER)).await.is_err());
        let success = create_record("action_success", LogLevel::Info, ATTACKER);
        assert!(detector.evaluate(&success).await.unwrap().is_none());
    }

    #[test]
    fn test_window_state_classification() {
        assert_eq!(WindowState::classify(0, 5), WindowState::Absent);
        assert_eq!(WindowState::classify(1, 5), WindowState::Counting(1));
        assert_eq!(WindowState::classify(4, 5), WindowState::Counting(4));
        assert_eq!(WindowState::classify(5, 5), WindowState::Alerted);
        assert_eq!(WindowState::classify(9, 5), WindowState::Alerted);
    }

    #[test]
    fn test_counter_key_format() {
        assert_eq!(
            DetectionRule::default().counter_key(ATTACKER),
            "suspicious_ip:66.66.66.66"
        );
    }
}
