//! Startup wiring
//!
//! Builds every client from the configuration, checks that each one can
//! reach its backend, and hands them out as trait objects. Nothing here is
//! global: the daemon owns the returned [`Dependencies`] for its lifetime.

use std::sync::Arc;
use std::time::Duration;

use crate::alerting::AlertQueue;
use crate::config::{Config, CounterBackend, IndexBackend};
use crate::counter::{MemoryCounterStore, RedisCounterStore, WindowCounterStore};
use crate::detection::{DetectionRule, SecurityDetector};
use crate::error::PipelineError;
use crate::index::{ElasticsearchSink, IndexSink, SqliteIndexSink};
use crate::processor::{Processor, ProcessorSettings};
use crate::queue::{QueueTransport, RedisQueue};

/// Connected clients for one processor process
pub struct Dependencies {
    pub queue: Arc<dyn QueueTransport>,
    pub counter_store: Arc<dyn WindowCounterStore>,
    pub index: Arc<dyn IndexSink>,
}

/// Connect the queue as a consumer and claim the configured consumer id
pub async fn connect_queue(config: &Config) -> Result<Arc<RedisQueue>, PipelineError> {
    let queue = RedisQueue::connect(
        &config.queue.redis_url,
        &config.queue.queue_name,
        &config.queue.consumer_id,
        config.queue.poll_interval(),
    )
    .await?;
    queue.ping().await?;
    queue.claim().await?;
    log::info!(
        "[init] Connected to queue '{}' as {}",
        queue.queue_name(),
        config.queue.consumer_id
    );
    Ok(Arc::new(queue))
}

/// Connect the configured counter store
pub async fn connect_counter_store(
    config: &Config,
) -> Result<Arc<dyn WindowCounterStore>, PipelineError> {
    let store: Arc<dyn WindowCounterStore> = match config.counter_store.backend {
        CounterBackend::Redis => {
            Arc::new(RedisCounterStore::connect(&config.counter_store.redis_url).await?)
        }
        CounterBackend::Memory => {
            log::warn!("Using in-process counters; detection is only correct for a single processor");
            Arc::new(MemoryCounterStore::new())
        }
    };
    store.ping().await?;
    log::info!("[init] Counter store ready ({:?})", config.counter_store.backend);
    Ok(store)
}

/// Connect the configured index sink
pub async fn connect_index(config: &Config) -> Result<Arc<dyn IndexSink>, PipelineError> {
    let index: Arc<dyn IndexSink> = match config.index.backend {
        IndexBackend::Elasticsearch => Arc::new(ElasticsearchSink::new(
            &config.index.url,
            &config.index.index_name,
            Duration::from_secs(config.index.timeout_secs),
        )?),
        IndexBackend::Sqlite => Arc::new(SqliteIndexSink::new(&config.index.sqlite_path)?),
    };
    index.health_check().await?;
    log::info!("[init] Index ready ({})", index.name());
    Ok(index)
}

/// Connect every dependency. Any failure here is fatal: the processor must
/// not start consuming without all three backends.
pub async fn connect(config: &Config) -> Result<Dependencies, PipelineError> {
    config.validate()?;

    let counter_store = connect_counter_store(config).await?;
    let index = connect_index(config).await?;
    let queue = connect_queue(config).await?;
    // Messages this consumer left unacknowledged in a previous run
    queue.recover().await?;
    let backlog = queue.len().await?;
    log::info!("[init] {} message(s) waiting in '{}'", backlog, queue.queue_name());

    Ok(Dependencies {
        queue,
        counter_store,
        index,
    })
}

/// Assemble a processor from connected dependencies
pub fn build_processor(config: &Config, deps: &Dependencies, alerts: AlertQueue) -> Processor {
    let rule = DetectionRule::from_config(&config.detection, &config.counter_store);
    let detector = Arc::new(SecurityDetector::new(rule, deps.counter_store.clone()));

    Processor::new(
        deps.queue.clone(),
        detector,
        deps.index.clone(),
        alerts,
        ProcessorSettings::from_config(config),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertDispatcher;
    use crate::config::ConfigError;
    use crate::queue::MemoryQueue;

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let mut config = Config::default();
        config.detection.threshold = 0;

        assert!(matches!(
            connect(&config).await,
            Err(PipelineError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_index_is_fatal() {
        let mut config = Config::default();
        config.index.url = "http://127.0.0.1:9".to_string();
        config.index.timeout_secs = 1;

        assert!(matches!(
            connect_index(&config).await,
            Err(PipelineError::Index(_))
        ));
    }

    #[tokio::test]
    async fn test_local_backends_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.counter_store.backend = CounterBackend::Memory;
        config.index.backend = IndexBackend::Sqlite;
        config.index.sqlite_path = dir.path().join("index.db");

        let counter_store = connect_counter_store(&config).await.unwrap();
        let index = connect_index(&config).await.unwrap();
        assert_eq!(index.name(), "sqlite");

        let deps = Dependencies {
            queue: Arc::new(MemoryQueue::new()),
            counter_store,
            index,
        };
        let (tx, _rx) = AlertDispatcher::create_channel();
        let processor = build_processor(&config, &deps, AlertQueue::new(tx));
        assert_eq!(processor.stats().snapshot().received, 0);
    }
}
