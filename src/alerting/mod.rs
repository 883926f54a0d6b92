//! Alert surface
//!
//! Workers hand alerts to an [`AlertQueue`]; a single [`AlertDispatcher`]
//! task logs each one and writes it through the configured
//! [`OutputHandler`]. The dispatcher stops once every queue handle has been
//! dropped, after draining whatever is still buffered.

use crate::models::Alert;
use crate::output::OutputHandler;
use thiserror::Error;
use tokio::sync::mpsc;

const ALERT_CHANNEL_CAPACITY: usize = 100;

/// Errors that can occur while queueing an alert
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert channel closed")]
    ChannelClosed,
}

/// Drains the alert channel into the output handler
pub struct AlertDispatcher {
    output: OutputHandler,
}

impl AlertDispatcher {
    pub fn new(output: OutputHandler) -> Self {
        AlertDispatcher { output }
    }

    /// Create a sender for queueing alerts
    pub fn create_channel() -> (mpsc::Sender<Alert>, mpsc::Receiver<Alert>) {
        mpsc::channel(ALERT_CHANNEL_CAPACITY)
    }

    /// Run the alert dispatch loop
    ///
    /// This method should be spawned as a tokio task. It returns the number
    /// of alerts dispatched once the channel is closed and empty.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Alert>) -> u64 {
        log::info!("Alert dispatcher started");
        let mut dispatched = 0u64;

        while let Some(alert) = rx.recv().await {
            log::warn!(
                "[RTAP ALERT] BRUTE FORCE DETECTED! ip={} failures={} detected_at={}",
                alert.source_ip,
                alert.triggering_count,
                alert.detection_timestamp.to_rfc3339()
            );

            if let Err(e) = self.output.write_alert(&alert) {
                log::error!("Failed to write alert for {}: {}", alert.source_ip, e);
            }
            dispatched += 1;
        }

        if let Err(e) = self.output.flush() {
            log::error!("Failed to flush alert output: {}", e);
        }
        log::info!("Alert dispatcher stopped ({} alert(s))", dispatched);
        dispatched
    }
}

/// Clonable handle used by workers to raise alerts
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<Alert>,
}

impl AlertQueue {
    /// Create a new alert queue with the given sender
    pub fn new(tx: mpsc::Sender<Alert>) -> Self {
        AlertQueue { tx }
    }

    /// Queue an alert, waiting for room if the dispatcher is behind.
    ///
    /// Alerts fire once per window, so dropping one under backpressure
    /// would lose it for good.
    pub async fn queue_alert(&self, alert: Alert) -> Result<(), AlertError> {
        self.tx
            .send(alert)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    /// Check if the queue is closed
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
