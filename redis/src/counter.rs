//! Counter store backed by `Redis`, counting each event at most once.

use actionstream_core::{CounterStore, EventId, StoreError, StoreFuture, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError, Script};
use std::time::Duration;

const STORE: &str = "counter";

/// Set the marker if absent and increment; otherwise return the current value.
const INCREMENT_ONCE: &str = r"
if redis.call('SET', KEYS[2], '1', 'NX', 'EX', ARGV[1]) then
    return redis.call('INCR', KEYS[1])
else
    return redis.call('GET', KEYS[1]) or '0'
end
";

/// Counter store settings.
#[derive(Debug, Clone)]
pub struct RedisCounterConfig {
    /// How long an event stays deduplicated after it was counted.
    ///
    /// Must exceed the longest expected redelivery delay.
    pub marker_ttl: Duration,
}

impl Default for RedisCounterConfig {
    fn default() -> Self {
        Self {
            marker_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// `Redis`-backed [`CounterStore`].
///
/// # Example
///
/// ```no_run
/// use actionstream_redis::{RedisCounterConfig, RedisCounterStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisCounterStore::connect("redis://127.0.0.1:6379", RedisCounterConfig::default()).await?;
/// store.ping().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisCounterStore {
    conn_manager: ConnectionManager,
    script: Script,
    marker_ttl_secs: u64,
}

impl RedisCounterStore {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(redis_url: &str, config: RedisCounterConfig) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::unavailable(STORE, format!("invalid Redis URL: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::unavailable(STORE, e))?;
        Ok(Self::new(conn_manager, config))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, config: RedisCounterConfig) -> Self {
        Self {
            conn_manager,
            script: Script::new(INCREMENT_ONCE),
            marker_ttl_secs: config.marker_ttl.as_secs().max(1),
        }
    }

    /// Counter key for `user_id`.
    #[must_use]
    pub fn counter_key(user_id: UserId) -> String {
        format!("user:{user_id}:actions")
    }

    /// Deduplication marker key for `event_id`.
    #[must_use]
    pub fn marker_key(event_id: &EventId) -> String {
        format!("event:{event_id}:counted")
    }

    /// Round-trip a `PING`. Used by readiness checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the server does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(&e))?;
        Ok(())
    }

    async fn increment(&self, user_id: UserId, event_id: EventId) -> Result<u64, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: u64 = self
            .script
            .key(Self::counter_key(user_id))
            .key(Self::marker_key(&event_id))
            .arg(self.marker_ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error(&e))?;

        tracing::debug!(user_id = %user_id, event_id = %event_id, value, "Counter incremented once");
        Ok(value)
    }

    async fn read(&self, user_id: UserId) -> Result<u64, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<u64> = conn
            .get(Self::counter_key(user_id))
            .await
            .map_err(|e| store_error(&e))?;
        Ok(value.unwrap_or(0))
    }
}

impl CounterStore for RedisCounterStore {
    fn increment_once(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, u64> {
        Box::pin(self.increment(user_id, event_id))
    }

    fn get(&self, user_id: UserId) -> StoreFuture<'_, u64> {
        Box::pin(self.read(user_id))
    }
}

/// A counter holding something other than an integer is corrupt; anything
/// else is treated as an outage.
fn store_error(error: &RedisError) -> StoreError {
    let not_a_counter = error.kind() == ErrorKind::TypeError
        || (error.kind() == ErrorKind::ResponseError && error.to_string().contains("not an integer"));
    if not_a_counter {
        StoreError::corrupt(STORE, error)
    } else {
        StoreError::unavailable(STORE, error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use actionstream_testing::fixtures;

    #[test]
    fn keys_follow_naming_scheme() {
        assert_eq!(RedisCounterStore::counter_key(fixtures::user(42)), "user:42:actions");
        assert_eq!(
            RedisCounterStore::marker_key(&EventId::parse("abc-1").unwrap()),
            "event:abc-1:counted"
        );
    }

    #[test]
    fn default_marker_ttl_is_a_week() {
        assert_eq!(RedisCounterConfig::default().marker_ttl, Duration::from_secs(604_800));
    }

    #[test]
    fn type_errors_are_corrupt() {
        let err = RedisError::from((ErrorKind::TypeError, "Response was of incompatible type"));
        assert!(matches!(store_error(&err), StoreError::Corrupt { store: "counter", .. }));
    }

    #[test]
    fn io_errors_are_unavailable() {
        let err = RedisError::from(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(store_error(&err), StoreError::Unavailable { store: "counter", .. }));
    }
}
