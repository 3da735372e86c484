use async_trait::async_trait;
use flashtix_core::{AcquireOutcome, ExtendOutcome, LeaseStore, StoreResult};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

use crate::deadline::within;

// Compare-then-act must run server-side so no other client interleaves.
const EXTEND_IF_HELD: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("PEXPIRE", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

const DELETE_IF_HELD: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Seat leases in Redis. Every call is bounded by `deadline`.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: MultiplexedConnection,
    deadline: Duration,
}

impl RedisLeaseStore {
    pub async fn new(connection_string: &str, deadline: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn, deadline })
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<AcquireOutcome> {
        let mut conn = self.conn.clone();

        // SET NX PX: create-if-absent with expiry in a single command
        let created: Option<String> = within(
            self.deadline,
            "acquire",
            redis::cmd("SET")
                .arg(key)
                .arg(holder)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn),
        )
        .await?;

        if created.is_some() {
            info!("Seat lease acquired: {} -> {}", key, holder);
            return Ok(AcquireOutcome::Acquired);
        }

        let current: Option<String> = within(self.deadline, "acquire.read", conn.get(key)).await?;
        Ok(AcquireOutcome::AlreadyHeld { holder: current })
    }

    async fn release(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        within(self.deadline, "release", conn.del::<_, ()>(key)).await
    }

    async fn release_held(&self, key: &str, holder: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(DELETE_IF_HELD);
        let deleted: i64 = within(
            self.deadline,
            "release_held",
            script.key(key).arg(holder).invoke_async(&mut conn),
        )
        .await?;
        Ok(deleted == 1)
    }

    async fn extend_ttl(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<ExtendOutcome> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(EXTEND_IF_HELD);
        let extended: i64 = within(
            self.deadline,
            "extend_ttl",
            script.key(key).arg(holder).arg(ttl_millis(ttl)).invoke_async(&mut conn),
        )
        .await?;

        if extended == 1 {
            Ok(ExtendOutcome::Extended)
        } else {
            Ok(ExtendOutcome::NotHeld)
        }
    }

    async fn read(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        within(self.deadline, "read", conn.get(key)).await
    }
}
