//! Reliable queue on Redis lists
//!
//! Producers `LPUSH` onto the queue. A consumer moves the oldest message
//! into its own processing list with `RPOPLPUSH`, and the message is removed
//! from there on ack. Anything left in the processing list after a crash is
//! pushed back onto the queue by [`RedisQueue::recover`] on the next start.
//!
//! A consumer id may only be used by one process at a time. The owner holds
//! a claim key with a short TTL and renews it while receiving, so a second
//! process configured with the same id fails at startup instead of
//! recovering messages that are still being processed.

use super::{Delivery, QueueError, QueueTransport};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const CLAIM_TTL: Duration = Duration::from_secs(30);
const CLAIM_RENEW_EVERY: Duration = Duration::from_secs(10);

// Take or renew the claim unless another token holds it.
const CLAIM_SCRIPT: &str = r#"
local owner = redis.call('GET', KEYS[1])
if owner == false or owner == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
    return 1
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis list queue with a per-consumer processing list
pub struct RedisQueue {
    manager: ConnectionManager,
    queue_name: String,
    processing_list: String,
    poll_interval: Duration,
    next_tag: AtomicU64,
    /// Deliveries handed out and not yet settled, by tag
    in_flight: Mutex<HashMap<u64, Vec<u8>>>,
    consumer_id: String,
    claim_key: String,
    claim_token: String,
    /// When the claim was last taken or renewed; `None` until [`RedisQueue::claim`]
    claim_renewed: Mutex<Option<Instant>>,
}

impl RedisQueue {
    /// Connect and bind to `queue_name` as consumer `consumer_id`
    pub async fn connect(
        redis_url: &str,
        queue_name: &str,
        consumer_id: &str,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(RedisQueue {
            manager,
            queue_name: queue_name.to_string(),
            processing_list: format!("{}:processing:{}", queue_name, consumer_id),
            poll_interval,
            next_tag: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
            consumer_id: consumer_id.to_string(),
            claim_key: format!("{}:consumer:{}", queue_name, consumer_id),
            claim_token: format!(
                "{}-{}",
                std::process::id(),
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ),
            claim_renewed: Mutex::new(None),
        })
    }

    /// Take exclusive use of this consumer id. Call before [`RedisQueue::recover`].
    ///
    /// Fails with [`QueueError::ConsumerInUse`] while another process holds
    /// the id; a crashed owner's claim lapses after 30 seconds.
    pub async fn claim(&self) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let taken: i64 = Script::new(CLAIM_SCRIPT)
            .key(&self.claim_key)
            .arg(&self.claim_token)
            .arg(CLAIM_TTL.as_secs())
            .invoke_async(&mut conn)
            .await?;

        if taken != 1 {
            return Err(QueueError::ConsumerInUse(self.consumer_id.clone()));
        }
        *self.lock_claim()? = Some(Instant::now());
        Ok(())
    }

    /// Renew a held claim once it is due
    async fn renew_claim(&self) -> Result<(), QueueError> {
        let due = match *self.lock_claim()? {
            Some(renewed) => renewed.elapsed() >= CLAIM_RENEW_EVERY,
            None => false,
        };
        if due {
            self.claim().await?;
        }
        Ok(())
    }

    fn lock_claim(&self) -> Result<std::sync::MutexGuard<'_, Option<Instant>>, QueueError> {
        self.claim_renewed
            .lock()
            .map_err(|_| QueueError::Unavailable("claim lock poisoned".to_string()))
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Return messages stranded in this consumer's processing list to the
    /// queue. Call before starting workers.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let mut moved = 0usize;

        loop {
            let message: Option<Vec<u8>> = conn
                .rpoplpush(&self.processing_list, &self.queue_name)
                .await?;
            match message {
                Some(_) => moved += 1,
                None => break,
            }
        }

        if moved > 0 {
            log::warn!(
                "Recovered {} unacknowledged message(s) from {}",
                moved,
                self.processing_list
            );
        }
        Ok(moved)
    }

    /// Number of messages waiting in the queue
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        Ok(conn.llen(&self.queue_name).await?)
    }

    fn take_in_flight(&self, delivery: &Delivery) -> Result<Vec<u8>, QueueError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| QueueError::Unavailable("in-flight map lock poisoned".to_string()))?;
        in_flight
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))
    }
}

#[async_trait]
impl QueueTransport for RedisQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.lpush(&self.queue_name, payload).await?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        // Polling keeps the multiplexed connection free for acks; a blocking
        // pop would stall every other command behind it.
        self.renew_claim().await?;
        let deadline = Instant::now() + wait;
        let mut conn = self.manager.clone();

        loop {
            let message: Option<Vec<u8>> = conn
                .rpoplpush(&self.queue_name, &self.processing_list)
                .await?;

            if let Some(payload) = message {
                let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
                self.in_flight
                    .lock()
                    .map_err(|_| QueueError::Unavailable("in-flight map lock poisoned".to_string()))?
                    .insert(tag, payload.clone());
                return Ok(Some(Delivery { tag, payload }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let payload = self.take_in_flight(delivery)?;
        let mut conn = self.manager.clone();
        let _: i64 = conn.lrem(&self.processing_list, 1, payload).await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let payload = self.take_in_flight(delivery)?;
        let mut conn = self.manager.clone();

        if requeue {
            // RPUSH puts it at the consuming end so it is retried next.
            redis::pipe()
                .atomic()
                .lrem(&self.processing_list, 1, &payload)
                .ignore()
                .rpush(&self.queue_name, &payload)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await?;
        } else {
            let _: i64 = conn.lrem(&self.processing_list, 1, payload).await?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(QueueError::Unavailable(format!("unexpected PING reply {}", reply)))
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        let held = self.lock_claim()?.take().is_some();
        if held {
            let mut conn = self.manager.clone();
            let _: i64 = Script::new(RELEASE_SCRIPT)
                .key(&self.claim_key)
                .arg(&self.claim_token)
                .invoke_async(&mut conn)
                .await?;
        }
        Ok(())
    }
}
