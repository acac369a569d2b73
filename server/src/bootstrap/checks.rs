//! Readiness checks for the external dependencies.

use actionstream_postgres::{DeadLetterQueue, PostgresHistoryStore};
use actionstream_redis::RedisCounterStore;
use actionstream_redpanda::RedpandaStreamLog;
use actionstream_runtime::{DependencyCheck, HealthCheck};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

type CheckFuture<'a> = Pin<Box<dyn Future<Output = HealthCheck> + Send + 'a>>;

/// Broker metadata round-trip.
pub struct StreamLogCheck {
    log: Arc<RedpandaStreamLog>,
    timeout: Duration,
}

impl StreamLogCheck {
    /// Check `log`, giving the metadata request `timeout`.
    #[must_use]
    pub const fn new(log: Arc<RedpandaStreamLog>, timeout: Duration) -> Self {
        Self { log, timeout }
    }
}

impl DependencyCheck for StreamLogCheck {
    fn component(&self) -> String {
        "stream_log".to_string()
    }

    fn check(&self) -> CheckFuture<'_> {
        Box::pin(async move {
            match self.log.check_connection(self.timeout).await {
                Ok(()) => HealthCheck::healthy("stream_log")
                    .with_metadata("topic", self.log.topic())
                    .with_metadata("brokers", self.log.brokers()),
                Err(e) => HealthCheck::unhealthy("stream_log", e.to_string()),
            }
        })
    }
}

/// `SELECT 1` against the history database, plus the pending dead-letter count.
///
/// Pending dead letters leave the store usable, so they only degrade it.
pub struct HistoryCheck {
    history: Arc<PostgresHistoryStore>,
    dead_letters: Arc<DeadLetterQueue>,
}

impl HistoryCheck {
    /// Check `history` and report the backlog of `dead_letters`.
    #[must_use]
    pub const fn new(history: Arc<PostgresHistoryStore>, dead_letters: Arc<DeadLetterQueue>) -> Self {
        Self {
            history,
            dead_letters,
        }
    }
}

impl DependencyCheck for HistoryCheck {
    fn component(&self) -> String {
        "history".to_string()
    }

    fn check(&self) -> CheckFuture<'_> {
        Box::pin(async move {
            if let Err(e) = self.history.ping().await {
                return HealthCheck::unhealthy("history", e.to_string());
            }
            match self.dead_letters.count_pending().await {
                Ok(0) => HealthCheck::healthy("history").with_metadata("dlq_pending", 0),
                Ok(pending) => HealthCheck::degraded(
                    "history",
                    format!("{pending} dead-lettered envelopes awaiting review"),
                )
                .with_metadata("dlq_pending", pending),
                Err(e) => HealthCheck::degraded("history", format!("dead-letter count failed: {e}")),
            }
        })
    }
}

/// Redis `PING`.
pub struct CounterCheck {
    counter: Arc<RedisCounterStore>,
}

impl CounterCheck {
    /// Check `counter`.
    #[must_use]
    pub const fn new(counter: Arc<RedisCounterStore>) -> Self {
        Self { counter }
    }
}

impl DependencyCheck for CounterCheck {
    fn component(&self) -> String {
        "counter".to_string()
    }

    fn check(&self) -> CheckFuture<'_> {
        Box::pin(async move {
            match self.counter.ping().await {
                Ok(()) => HealthCheck::healthy("counter"),
                Err(e) => HealthCheck::unhealthy("counter", e.to_string()),
            }
        })
    }
}
