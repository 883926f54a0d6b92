//! Processor loop
//!
//! A fixed pool of workers competes for messages on one queue. Each worker
//! takes one message at a time, runs detection and indexing side by side,
//! then settles the message with the transport. Per-record failures are
//! logged and counted; they never stop a worker.

pub mod stats;

pub use stats::{ProcessorStats, StatsSnapshot};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::alerting::AlertQueue;
use crate::config::Config;
use crate::detection::SecurityDetector;
use crate::index::IndexSink;
use crate::models::{Alert, EventRecord};
use crate::queue::{Delivery, QueueTransport};
use stats::bump;

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub workers: usize,
    /// Bound for each of the detection and index steps of one record
    pub record_timeout: Duration,
    /// How long one receive call may wait for a message
    pub receive_wait: Duration,
    pub requeue_on_failure: bool,
    /// Pause after a failed receive, and before a message is requeued
    pub error_backoff: Duration,
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        ProcessorSettings {
            workers: config.processor.workers,
            record_timeout: config.processor.record_timeout(),
            receive_wait: config.queue.receive_wait(),
            requeue_on_failure: config.processor.requeue_on_failure,
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        ProcessorSettings::from_config(&Config::default())
    }
}

/// How a delivery was settled with the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed (successfully or best-effort) and acknowledged
    Acked,
    /// Put back on the queue after the counter store failed
    Requeued,
    /// Undecodable, discarded
    Dropped,
}

/// Consumes event records and drives detection and indexing
pub struct Processor {
    queue: Arc<dyn QueueTransport>,
    detector: Arc<SecurityDetector>,
    index: Arc<dyn IndexSink>,
    alerts: AlertQueue,
    settings: ProcessorSettings,
    stats: Arc<ProcessorStats>,
}

impl Processor {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        detector: Arc<SecurityDetector>,
        index: Arc<dyn IndexSink>,
        alerts: AlertQueue,
        settings: ProcessorSettings,
    ) -> Self {
        Processor {
            queue,
            detector,
            index,
            alerts,
            settings,
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    /// Shared handle to the live counters
    pub fn stats(&self) -> Arc<ProcessorStats> {
        self.stats.clone()
    }

    /// Run the worker pool until `shutdown` turns true.
    ///
    /// Workers finish the record they are holding before exiting. The
    /// processor (and with it its alert queue handle) is dropped on return,
    /// which lets the alert dispatcher drain and stop.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> StatsSnapshot {
        let workers = self.settings.workers.max(1);
        let stats = self.stats.clone();
        let processor = Arc::new(self);

        log::info!("Starting {} worker(s)", workers);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let processor = processor.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                processor.worker_loop(worker_id, shutdown).await
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Worker task failed: {}", e);
            }
        }
        drop(processor);

        let snapshot = stats.snapshot();
        log::info!(
            "Processor stopped: received={} processed={} alerts={} decode_failures={} \
             detection_failures={} index_failures={} acked={} requeued={}",
            snapshot.received,
            snapshot.processed,
            snapshot.alerts,
            snapshot.decode_failures,
            snapshot.detection_failures,
            snapshot.index_failures,
            snapshot.acked,
            snapshot.requeued
        );
        snapshot
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        log::debug!("Worker {} started", worker_id);

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            match self.queue.receive(self.settings.receive_wait).await {
                Ok(Some(delivery)) => {
                    self.process_delivery(delivery).await;
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("Worker {}: receive failed: {}", worker_id, e);
                    let sender_gone = tokio::select! {
                        _ = sleep(self.settings.error_backoff) => false,
                        changed = shutdown.changed() => changed.is_err(),
                    };
                    if sender_gone {
                        break;
                    }
                }
            }
        }

        log::debug!("Worker {} stopped", worker_id);
    }

    /// Handle one delivery end to end and settle it with the transport
    pub async fn process_delivery(&self, delivery: Delivery) -> Outcome {
        bump(&self.stats.received);

        let record = match EventRecord::from_json_bytes(&delivery.payload) {
            Ok(record) => record,
            Err(e) => {
                // Retrying cannot fix a malformed body.
                bump(&self.stats.decode_failures);
                log::warn!(
                    "Dropping undecodable message ({} bytes): {}",
                    delivery.payload.len(),
                    e
                );
                self.settle(&delivery, false, Outcome::Dropped).await;
                return Outcome::Dropped;
            }
        };

        log::debug!(
            "[received] {} {} {} from {}",
            record.id,
            record.event_type,
            record.log_level,
            record.source_ip
        );

        let retry = self.detect_and_index(&record).await;
        bump(&self.stats.processed);

        if retry && self.settings.requeue_on_failure {
            // Hold the message back so a store outage is not retried in a tight loop.
            sleep(self.settings.error_backoff).await;
            self.settle(&delivery, true, Outcome::Requeued).await;
            Outcome::Requeued
        } else {
            self.settle(&delivery, false, Outcome::Acked).await;
            Outcome::Acked
        }
    }

    /// Run detection and indexing concurrently.
    ///
    /// Returns true only when the counter store rejected the increment, the
    /// one failure a redelivery can repair without counting the record twice.
    /// Index failures are logged and never cause a retry. Detection runs as
    /// its own task: if it outlives the record timeout it is left to finish
    /// in the background so that a threshold reply is still turned into an
    /// alert.
    async fn detect_and_index(&self, record: &EventRecord) -> bool {
        let limit = self.settings.record_timeout;
        let mut detection = {
            let detector = self.detector.clone();
            let record = record.clone();
            tokio::spawn(async move { detector.evaluate(&record).await })
        };

        let (detected, indexing) = tokio::join!(
            timeout(limit, &mut detection),
            timeout(limit, self.index.write(record)),
        );

        let mut retry = false;

        match detected {
            Ok(Ok(Ok(Some(alert)))) => raise_alert(&self.alerts, &self.stats, alert).await,
            Ok(Ok(Ok(None))) => {}
            Ok(Ok(Err(e))) => {
                retry = true;
                bump(&self.stats.detection_failures);
                log::error!(
                    "[detect] record {} from {}: counter store error: {}",
                    record.id,
                    record.source_ip,
                    e
                );
            }
            Ok(Err(e)) => {
                bump(&self.stats.detection_failures);
                log::error!("[detect] record {}: detection task failed: {}", record.id, e);
            }
            Err(_) => {
                bump(&self.stats.detection_failures);
                log::warn!(
                    "[detect] record {} from {}: no counter reply after {:?}, finishing in background",
                    record.id,
                    record.source_ip,
                    limit
                );
                let alerts = self.alerts.clone();
                let stats = self.stats.clone();
                let record_id = record.id.clone();
                tokio::spawn(async move {
                    match detection.await {
                        Ok(Ok(Some(alert))) => raise_alert(&alerts, &stats, alert).await,
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) => {
                            log::error!("[detect] record {}: late counter store error: {}", record_id, e)
                        }
                        Err(e) => {
                            log::error!("[detect] record {}: detection task failed: {}", record_id, e)
                        }
                    }
                });
            }
        }

        match indexing {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                bump(&self.stats.index_failures);
                log::warn!("[index] record {} not indexed in {}: {}", record.id, self.index.name(), e);
            }
            Err(_) => {
                bump(&self.stats.index_failures);
                log::warn!(
                    "[index] record {} not indexed in {}: timed out after {:?}",
                    record.id,
                    self.index.name(),
                    limit
                );
            }
        }

        retry
    }

    async fn settle(&self, delivery: &Delivery, requeue: bool, outcome: Outcome) {
        let result = match outcome {
            Outcome::Acked => self.queue.ack(delivery).await,
            Outcome::Requeued | Outcome::Dropped => self.queue.nack(delivery, requeue).await,
        };

        match result {
            Ok(()) => match outcome {
                Outcome::Acked => bump(&self.stats.acked),
                Outcome::Requeued => bump(&self.stats.requeued),
                Outcome::Dropped => {}
            },
            Err(e) => {
                bump(&self.stats.settle_failures);
                log::error!("Failed to settle delivery {} ({:?}): {}", delivery.tag, outcome, e);
            }
        }
    }
}

async fn raise_alert(alerts: &AlertQueue, stats: &ProcessorStats, alert: Alert) {
    bump(&stats.alerts);
    let source_ip = alert.source_ip.clone();
    if let Err(e) = alerts.queue_alert(alert).await {
        log::error!("Alert for {} lost: {}", source_ip, e);
    }
}
