//! Redis implementation of the WindowCounterStore trait

use super::{StoreError, WindowCounterStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

// INCR and the first-hit EXPIRE run as one script so a crash between the
// two can never leave a counter without a TTL.
const INCREMENT_SCRIPT: &str = r#"
local n = redis.call('INCR', KEYS[1])
if n == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return n
"#;

/// Redis-backed window counters
///
/// The connection manager reconnects on its own after a dropped
/// connection, so a Redis restart costs the records processed while it was
/// down but does not require restarting the processor.
#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis at `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(RedisCounterStore {
            manager,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl WindowCounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.manager.clone();
        let ttl_secs = window.as_secs().max(1);
        let count: i64 = self
            .script
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        u64::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative counter {} at {}", count, key)))
    }

    async fn current(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply {}", reply)))
        }
    }
}
