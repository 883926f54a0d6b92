use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the SIEM processor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue transport configuration
    pub queue: QueueConfig,
    /// Window counter store configuration
    pub counter_store: CounterStoreConfig,
    /// Brute force detection rule
    pub detection: DetectionConfig,
    /// Search index configuration
    pub index: IndexConfig,
    /// Worker pool configuration
    pub processor: ProcessorConfig,
    /// Alert output configuration
    pub output: OutputConfig,
}

/// Queue transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Well-known queue every producer publishes to
    pub queue_name: String,
    /// Names this process's processing list; must be unique per process.
    /// Defaults to `processor-<hostname>`.
    pub consumer_id: String,
    /// Sleep between polls of an empty queue
    pub poll_interval_ms: u64,
    /// How long a single receive waits for a message before returning empty
    pub receive_wait_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    Redis,
    Memory,
}

/// Window counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterStoreConfig {
    pub backend: CounterBackend,
    pub redis_url: String,
    /// Prefix prepended to the source IP to form the counter key
    pub key_prefix: String,
}

/// Detection rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Event type counted as a failure
    pub event_type: String,
    /// Log level counted as a failure
    pub log_level: String,
    /// Failures inside one window that raise an alert
    pub threshold: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Elasticsearch,
    Sqlite,
}

/// Search index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Elasticsearch base URL
    pub url: String,
    pub index_name: String,
    /// Database file (if backend is "sqlite")
    pub sqlite_path: PathBuf,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of competing consumers
    pub workers: usize,
    /// Upper bound for each of the detection and index steps of one record
    pub record_timeout_ms: u64,
    /// Requeue a record whose detection or index step failed instead of
    /// acknowledging it
    pub requeue_on_failure: bool,
}

/// Alert output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format: "json", "jsonl", or "console"
    pub format: String,
    /// Output file path (if format is not "console")
    pub file_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            queue_name: "siem-logs-queue".to_string(),
            consumer_id: default_consumer_id(),
            poll_interval_ms: 100,
            receive_wait_ms: 1000,
        }
    }
}

impl Default for CounterStoreConfig {
    fn default() -> Self {
        CounterStoreConfig {
            backend: CounterBackend::Redis,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            key_prefix: "suspicious_ip:".to_string(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            event_type: "login_failed".to_string(),
            log_level: "WARN".to_string(),
            threshold: 5,
            window_seconds: 10,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            backend: IndexBackend::Elasticsearch,
            url: "http://127.0.0.1:9200".to_string(),
            index_name: "siem-logs".to_string(),
            sqlite_path: PathBuf::from("siem-logs.db"),
            timeout_secs: 10,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            workers: 4,
            record_timeout_ms: 5000,
            requeue_on_failure: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            format: "console".to_string(),
            file_path: None,
        }
    }
}

impl DetectionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl ProcessorConfig {
    pub fn record_timeout(&self) -> Duration {
        Duration::from_millis(self.record_timeout_ms)
    }
}

/// Consumer id for this host, `processor-1` when the hostname is unknown
fn default_consumer_id() -> String {
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok());
    consumer_id_for(hostname.as_deref())
}

fn consumer_id_for(hostname: Option<&str>) -> String {
    match hostname.map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => format!("processor-{}", host),
        None => "processor-1".to_string(),
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override connection settings from the environment.
    ///
    /// `SIEM_REDIS_URL` applies to both the queue and the counter store.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SIEM_REDIS_URL") {
            self.queue.redis_url = url.clone();
            self.counter_store.redis_url = url;
        }
        if let Ok(url) = std::env::var("SIEM_ELASTICSEARCH_URL") {
            self.index.url = url;
        }
        if let Ok(id) = std::env::var("SIEM_CONSUMER_ID") {
            self.queue.consumer_id = id;
        }
        if let Ok(workers) = std::env::var("SIEM_WORKERS") {
            match workers.parse() {
                Ok(n) => self.processor.workers = n,
                Err(_) => log::warn!("Ignoring non-numeric SIEM_WORKERS={}", workers),
            }
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.threshold == 0 {
            return Err(ConfigError::Invalid("detection.threshold must be at least 1".into()));
        }
        if self.detection.window_seconds == 0 {
            return Err(ConfigError::Invalid("detection.window_seconds must be at least 1".into()));
        }
        if self.processor.workers == 0 {
            return Err(ConfigError::Invalid("processor.workers must be at least 1".into()));
        }
        if self.processor.record_timeout_ms == 0 {
            return Err(ConfigError::Invalid("processor.record_timeout_ms must be positive".into()));
        }
        if self.queue.consumer_id.trim().is_empty() {
            return Err(ConfigError::Invalid("queue.consumer_id must not be empty".into()));
        }
        if self.queue.queue_name.is_empty() {
            return Err(ConfigError::Invalid("queue.queue_name must not be empty".into()));
        }
        if self.index.index_name.is_empty() {
            return Err(ConfigError::Invalid("index.index_name must not be empty".into()));
        }
        Ok(())
    }
}
