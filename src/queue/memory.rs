//! In-process queue with explicit acknowledgement

use super::{Delivery, QueueError, QueueTransport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<(u64, Vec<u8>)>,
    unacked: HashMap<u64, Vec<u8>>,
    next_tag: u64,
    acked: u64,
    dropped: u64,
}

/// FIFO queue shared by competing consumers in one process
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting to be received
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Messages received but not yet acked or nacked
    pub fn unacked_len(&self) -> usize {
        self.state.lock().map(|s| s.unacked.len()).unwrap_or(0)
    }

    /// Total acknowledged messages
    pub fn acked(&self) -> u64 {
        self.state.lock().map(|s| s.acked).unwrap_or(0)
    }

    /// Total messages discarded through a nack without requeue
    pub fn dropped(&self) -> u64 {
        self.state.lock().map(|s| s.dropped).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))
    }

    fn try_take(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock()?;
        match state.ready.pop_front() {
            Some((tag, payload)) => {
                state.unacked.insert(tag, payload.clone());
                Ok(Some(Delivery { tag, payload }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.next_tag += 1;
        let tag = state.next_tag;
        state.ready.push_back((tag, payload.to_vec()));
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state
            .unacked
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;
        state.acked += 1;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let payload = state
            .unacked
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;

        if requeue {
            state.ready.push_front((delivery.tag, payload));
        } else {
            state.dropped += 1;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventRecord, LogLevel};
    use crate::queue::publish_record;

    #[tokio::test]
    async fn test_fifo_and_ack() {
        let queue = MemoryQueue::new();
        queue.publish(b"one").await.unwrap();
        queue.publish(b"two").await.unwrap();

        let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(queue.unacked_len(), 1);

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.unacked_len(), 0);
        assert_eq!(queue.acked(), 1);

        let second = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.payload, b"two");
    }

    #[tokio::test]
    async fn test_requeue_is_redelivered_first() {
        let queue = MemoryQueue::new();
        queue.publish(b"one").await.unwrap();
        queue.publish(b"two").await.unwrap();

        let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        queue.nack(&first, true).await.unwrap();

        let again = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.payload, b"one");
    }

    #[tokio::test]
    async fn test_nack_without_requeue_drops() {
        let queue = MemoryQueue::new();
        queue.publish(b"bad").await.unwrap();

        let delivery = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        queue.nack(&delivery, false).await.unwrap();

        assert_eq!(queue.ready_len(), 0);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_double_ack_is_rejected() {
        let queue = MemoryQueue::new();
        queue.publish(b"x").await.unwrap();
        let delivery = queue.receive(Duration::ZERO).await.unwrap().unwrap();

        queue.ack(&delivery).await.unwrap();
        assert!(matches!(
            queue.ack(&delivery).await,
            Err(QueueError::UnknownDelivery(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let received = queue.receive(Duration::from_millis(50)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_publish_record_validates() {
        let queue = MemoryQueue::new();
        let mut record = EventRecord {
            id: "r1".to_string(),
            timestamp: chrono::Utc::now(),
            service_name: "auth-service".to_string(),
            log_level: LogLevel::Info,
            event_type: "action_success".to_string(),
            source_ip: "10.0.0.5".to_string(),
            user_id: None,
            http_method: None,
            endpoint: None,
            response_time_ms: 40,
            message: None,
        };

        publish_record(&queue, &record).await.unwrap();
        assert_eq!(queue.ready_len(), 1);

        record.id.clear();
        assert!(matches!(
            publish_record(&queue, &record).await,
            Err(QueueError::Validation(_))
        ));
        assert_eq!(queue.ready_len(), 1);

        let delivery = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        let decoded = EventRecord::from_json_bytes(&delivery.payload).unwrap();
        assert_eq!(decoded.id, "r1");
    }
}
