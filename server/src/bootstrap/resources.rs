//! Infrastructure handles shared by every component of the process.
//!
//! Each connection is opened once at startup, with retry, and handed out as
//! `Arc` handles. Only what the configured role needs is opened: an
//! ingestion-only process never connects to `PostgreSQL` or Redis.

use crate::config::Config;
use actionstream_postgres::{DeadLetterQueue, PostgresHistoryStore};
use actionstream_redis::{RedisCounterConfig, RedisCounterStore};
use actionstream_redpanda::RedpandaStreamLog;
use actionstream_runtime::{RetryPolicy, retry_with_backoff};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Stores used by the processing workers and the analytics API.
#[derive(Clone)]
pub struct Stores {
    /// Durable history; the idempotency fence
    pub history: Arc<PostgresHistoryStore>,
    /// Dead-letter queue in the same database
    pub dead_letters: Arc<DeadLetterQueue>,
    /// Realtime counters
    pub counter: Arc<RedisCounterStore>,
}

/// Central resource manager for all infrastructure components.
#[derive(Clone)]
pub struct Resources {
    /// Stream log producer (and consumer factory)
    pub stream_log: Arc<RedpandaStreamLog>,
    /// Present when the role processes or serves analytics
    pub stores: Option<Stores>,
}

impl Resources {
    /// Open every connection the configured role needs.
    ///
    /// Brokers and databases are retried with backoff so the process can be
    /// started alongside them.
    ///
    /// # Errors
    ///
    /// Returns error if a dependency is still unreachable after the retries,
    /// or if database migrations fail.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let policy = startup_policy();

        info!(brokers = %config.redpanda.brokers, topic = %config.redpanda.topic, "Connecting to stream log...");
        let stream_log = Arc::new(
            RedpandaStreamLog::builder()
                .brokers(&config.redpanda.brokers)
                .topic(&config.redpanda.topic)
                .producer_acks(&config.redpanda.acks)
                .compression(&config.redpanda.compression)
                .timeout(Duration::from_millis(config.redpanda.send_timeout_ms))
                .consumer_group(&config.redpanda.consumer_group)
                .auto_offset_reset(&config.redpanda.auto_offset_reset)
                .build()
                .context("failed to create stream log producer")?,
        );
        retry_with_backoff(&policy, "stream log metadata", || {
            stream_log.check_connection(Duration::from_secs(5))
        })
        .await
        .context("stream log unreachable")?;
        info!("Stream log connected");

        let stores = if config.role.needs_stores() {
            Some(Self::connect_stores(config, &policy).await?)
        } else {
            None
        };

        Ok(Self { stream_log, stores })
    }

    async fn connect_stores(config: &Config, policy: &RetryPolicy) -> anyhow::Result<Stores> {
        info!("Connecting to history database...");
        let history = retry_with_backoff(policy, "history database", || {
            PostgresHistoryStore::connect(&config.postgres.url, config.postgres.max_connections)
        })
        .await
        .context("history database unreachable")?;

        info!("Running history migrations...");
        history.migrate().await.context("history migrations failed")?;

        let dead_letters = DeadLetterQueue::new(history.pool().clone());
        info!("History database connected");

        info!("Connecting to counter store...");
        let counter_config = RedisCounterConfig {
            marker_ttl: Duration::from_secs(config.redis.marker_ttl),
        };
        let counter = retry_with_backoff(policy, "counter store", || {
            RedisCounterStore::connect(&config.redis.url, counter_config.clone())
        })
        .await
        .context("counter store unreachable")?;
        info!("Counter store connected");

        Ok(Stores {
            history: Arc::new(history),
            dead_letters: Arc::new(dead_letters),
            counter: Arc::new(counter),
        })
    }

    /// Stores, or an error naming the role that should not have asked for them.
    ///
    /// # Errors
    ///
    /// Returns error if the stores were not opened for this role.
    pub fn stores(&self) -> anyhow::Result<&Stores> {
        self.stores
            .as_ref()
            .context("history and counter stores were not opened for this role")
    }
}

fn startup_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(10)
        .initial_delay(Duration::from_millis(500))
        .max_delay(Duration::from_secs(10))
        .jitter(true)
        .build()
}
