//! Queue transport
//!
//! Decouples producers from the processor. Messages are UTF-8 JSON event
//! records, delivered at least once and removed only when the consumer
//! acknowledges them.

pub mod memory;
pub mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

use crate::models::{EventRecord, ValidationError};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur on the queue transport
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rejected record: {0}")]
    Validation(#[from] ValidationError),

    #[error("Consumer id {0} is held by another process")]
    ConsumerInUse(String),

    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// A message handed to a consumer and not yet acknowledged
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Transport-specific handle used by ack/nack
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// Operations the processor needs from a queue backend
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Append one message to the queue
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Take the next message, waiting up to `wait` for one to arrive.
    ///
    /// The message stays owned by this consumer until it is acked or nacked.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove a processed message for good
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Give up on a message, either putting it back at the head of the queue
    /// or discarding it
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Round-trip check used at startup
    async fn ping(&self) -> Result<(), QueueError>;

    /// Release anything this consumer holds on the backend
    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Ingestion boundary: validate a record and enqueue its JSON form.
///
/// Returns as soon as the queue accepted the message; processing happens
/// later and its outcome is never reported back to the producer.
pub async fn publish_record(
    queue: &dyn QueueTransport,
    record: &EventRecord,
) -> Result<(), QueueError> {
    record.validate()?;
    let body = record.to_json_bytes()?;
    queue.publish(&body).await?;
    log::debug!("[sent] record {} queued", record.id);
    Ok(())
}
