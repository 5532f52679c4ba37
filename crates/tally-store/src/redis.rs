use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::sync::LazyLock;
use std::time::Duration;
use tally_core::error::Result;
use tally_core::{BucketKey, CounterStore, StoreError};
use tracing::{debug, trace, warn};

/// `INCRBY` that refuses to create the key.
///
/// Plain `INCRBY` would silently recreate a counter that expired between a
/// caller's `EXISTS` and its increment, leaving a key with no TTL behind.
static INCREMENT_EXISTING: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return false
end
return redis.call('INCRBY', KEYS[1], ARGV[1])
",
    )
});

/// `SET NX PX` when absent, `INCRBY` otherwise, in one round-trip.
static SET_OR_INCREMENT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('INCRBY', KEYS[1], ARGV[2])
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[3])
return redis.call('GET', KEYS[1])
",
    )
});

/// A Redis-based implementation of [`CounterStore`].
///
/// Counters are plain Redis integers. Keys are the rendered bucket keys,
/// optionally namespaced by a store-level prefix, and always carry a `PX`
/// expiry so stale windows are reclaimed by Redis itself.
#[derive(Debug, Clone)]
pub struct RedisCounterStore {
    conn: redis::aio::MultiplexedConnection,
    namespace: String,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> StoreError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() || message.to_ascii_lowercase().contains("timed out") {
        StoreError::Timeout(message)
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(message)
    } else {
        StoreError::Operation(message)
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64> {
    match u64::try_from(ttl.as_millis()) {
        Ok(0) | Err(_) => Err(StoreError::Operation(format!(
            "ttl must be between 1ms and {}ms, got {ttl:?}",
            u64::MAX
        ))),
        Ok(millis) => Ok(millis),
    }
}

impl RedisCounterStore {
    /// Creates a new Redis counter store.
    ///
    /// # Arguments
    ///
    /// * `conn` - A multiplexed Redis connection
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self::with_namespace(conn, "")
    }

    /// Creates a new Redis counter store whose keys are prefixed with
    /// `namespace` (e.g., "myapp:serial:").
    pub fn with_namespace(
        conn: redis::aio::MultiplexedConnection,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    /// Opens a client for `url` and establishes a multiplexed connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Initialization(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("failed to connect to Redis", e))?;
        debug!(url = %url, "Connected to Redis counter store");
        Ok(Self::new(conn))
    }

    /// Generates the Redis key for a bucket.
    fn store_key(&self, key: &BucketKey) -> String {
        format!("{}{}", self.namespace, key.as_str())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn exists(&self, key: &BucketKey) -> Result<bool> {
        let store_key = self.store_key(key);
        trace!(key = %store_key, "Checking counter existence in Redis");

        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(&store_key).await.map_err(|e| {
            warn!(key = %store_key, error = %e, "Redis error on exists");
            map_redis_error("failed to check key in Redis", e)
        })
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &BucketKey,
        value: i64,
        ttl: Duration,
    ) -> Result<()> {
        let store_key = self.store_key(key);
        let ttl_ms = ttl_millis(ttl)?;
        trace!(key = %store_key, value, ttl_ms, "Creating counter in Redis");

        let mut conn = self.conn.clone();
        // NX turns a lost race into a no-op; the nil reply is not an error
        let created: Option<String> = redis::cmd("SET")
            .arg(&store_key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key = %store_key, error = %e, "Failed to create counter in Redis");
                map_redis_error("failed to set key in Redis", e)
            })?;

        if created.is_none() {
            debug!(key = %store_key, "Counter already existed, SET NX skipped");
        }
        Ok(())
    }

    async fn increment_by(&self, key: &BucketKey, step: i64) -> Result<i64> {
        let store_key = self.store_key(key);
        trace!(key = %store_key, step, "Incrementing counter in Redis");

        let mut conn = self.conn.clone();
        let value: Option<i64> = INCREMENT_EXISTING
            .key(&store_key)
            .arg(step)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key = %store_key, error = %e, "Failed to increment counter in Redis");
                map_redis_error("failed to increment key in Redis", e)
            })?;

        value.ok_or(StoreError::MissingKey(store_key))
    }

    async fn set_or_increment(
        &self,
        key: &BucketKey,
        seed: i64,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64> {
        let store_key = self.store_key(key);
        let ttl_ms = ttl_millis(ttl)?;
        trace!(key = %store_key, seed, delta, "Set-or-increment counter in Redis");

        let mut conn = self.conn.clone();
        SET_OR_INCREMENT
            .key(&store_key)
            .arg(seed)
            .arg(delta)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key = %store_key, error = %e, "Failed to set-or-increment counter in Redis");
                map_redis_error("failed to set-or-increment key in Redis", e)
            })
    }

    async fn ttl(&self, key: &BucketKey) -> Result<Option<Duration>> {
        let store_key = self.store_key(key);
        trace!(key = %store_key, "Reading counter ttl from Redis");

        let mut conn = self.conn.clone();
        let pttl = conn.pttl::<_, i64>(&store_key).await.map_err(|e| {
            warn!(key = %store_key, error = %e, "Redis error on pttl");
            map_redis_error("failed to read ttl from Redis", e)
        })?;

        // -2: no such key, -1: no expiry
        Ok(u64::try_from(pttl).ok().map(Duration::from_millis))
    }
}
