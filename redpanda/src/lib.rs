//! Redpanda stream log for Actionstream.
//!
//! Implements [`StreamLog`] and [`LogConsumer`] from `actionstream-core` over
//! rdkafka, so it works against Redpanda or any Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with explicit commits:
//! - Appends wait for `acks=all` from an idempotent producer; a broker retry
//!   never duplicates a record
//! - Records are keyed by `userId`, so one user's records share a partition
//!   and are consumed in append order
//! - Auto-commit is disabled; the processing worker commits a record's
//!   offset only after both sinks have applied it. A consumer that stops
//!   without committing causes redelivery to the next group member
//!
//! # Example
//!
//! ```no_run
//! use actionstream_core::StreamLog;
//! use actionstream_redpanda::RedpandaStreamLog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = RedpandaStreamLog::builder()
//!     .brokers("localhost:9092")
//!     .topic("events")
//!     .consumer_group("actionstream-processor")
//!     .build()?;
//!
//! let receipt = log.append("42".to_string(), br#"{"userId":42}"#.to_vec()).await?;
//! println!("appended at {}@{}", receipt.partition, receipt.offset);
//!
//! let mut consumer = log.subscribe().await?;
//! while let Some(record) = consumer.next().await {
//!     let record = record?;
//!     // apply the record, then:
//!     consumer.commit(record.position()).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use actionstream_core::{
    AppendReceipt, LogConsumer, LogPosition, LogRecord, StreamLog, StreamLogError,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default topic carrying envelopes.
pub const DEFAULT_TOPIC: &str = "events";

/// Default consumer group of the processing workers.
pub const DEFAULT_CONSUMER_GROUP: &str = "actionstream-processor";

/// Redpanda-backed stream log.
///
/// One producer is shared by every append. Each call to
/// [`StreamLog::subscribe`] creates a new consumer joined to the configured
/// group, so several workers in one process split the partitions between
/// them.
pub struct RedpandaStreamLog {
    /// Producer shared by all appends
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Envelope topic
    topic: String,
    /// Producer send timeout
    timeout: Duration,
    /// Consumer group of the processing workers
    consumer_group: String,
    /// Where a group with no committed offset starts
    auto_offset_reset: String,
}

impl RedpandaStreamLog {
    /// Stream log with default settings against `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamLogError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, StreamLogError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaStreamLogBuilder {
        RedpandaStreamLogBuilder::default()
    }

    /// Broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Envelope topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group used by [`StreamLog::subscribe`].
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Fetch topic metadata. Used by startup and readiness checks.
    ///
    /// The metadata request blocks, so it runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`StreamLogError::ConnectionFailed`] if no broker answers within `timeout`.
    pub async fn check_connection(&self, timeout: Duration) -> Result<(), StreamLogError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(&topic), Timeout::After(timeout))
                .map(|_| ())
                .map_err(|e| StreamLogError::ConnectionFailed(e.to_string()))
        })
        .await
        .map_err(|e| StreamLogError::ConnectionFailed(e.to_string()))?
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false");
        config
    }

    async fn send(&self, key: String, payload: Vec<u8>) -> Result<AppendReceipt, StreamLogError> {
        let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %self.topic,
                    key = %key,
                    partition,
                    offset,
                    "Record appended"
                );
                Ok(AppendReceipt { partition, offset })
            }
            Err((kafka_error, _)) => {
                tracing::error!(topic = %self.topic, key = %key, error = %kafka_error, "Append failed");
                Err(StreamLogError::AppendFailed(kafka_error.to_string()))
            }
        }
    }

    fn open_consumer(&self) -> Result<Box<dyn LogConsumer>, StreamLogError> {
        let consumer: StreamConsumer = self.consumer_config().create().map_err(|e| {
            StreamLogError::SubscriptionFailed(format!("Failed to create consumer: {e}"))
        })?;

        consumer.subscribe(&[self.topic.as_str()]).map_err(|e| {
            StreamLogError::SubscriptionFailed(format!(
                "Failed to subscribe to '{}': {e}",
                self.topic
            ))
        })?;

        tracing::info!(
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            auto_offset_reset = %self.auto_offset_reset,
            manual_commit = true,
            "Subscribed to stream log"
        );

        Ok(Box::new(RedpandaConsumer {
            consumer,
            topic: self.topic.clone(),
        }))
    }
}

impl StreamLog for RedpandaStreamLog {
    fn append(
        &self,
        key: String,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<AppendReceipt, StreamLogError>> + Send + '_>> {
        Box::pin(self.send(key, payload))
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LogConsumer>, StreamLogError>> + Send + '_>>
    {
        Box::pin(async move { self.open_consumer() })
    }
}

/// Consumer joined to the processing group.
struct RedpandaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl RedpandaConsumer {
    async fn receive(&self) -> Option<Result<LogRecord, StreamLogError>> {
        let message = match self.consumer.recv().await {
            Ok(message) => message,
            Err(e) => return Some(Err(StreamLogError::ReceiveFailed(e.to_string()))),
        };

        let record = LogRecord {
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        };

        tracing::trace!(
            topic = message.topic(),
            partition = record.partition,
            offset = record.offset,
            "Received record"
        );
        Some(Ok(record))
    }

    fn store_offset(&self, position: LogPosition) -> Result<(), StreamLogError> {
        let failed = |reason: String| StreamLogError::CommitFailed {
            partition: position.partition,
            offset: position.offset,
            reason,
        };

        // The committed offset is the next one to read.
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, position.partition, Offset::Offset(position.offset + 1))
            .map_err(|e| failed(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| failed(e.to_string()))?;

        tracing::trace!(position = %position, "Offset committed");
        Ok(())
    }
}

impl LogConsumer for RedpandaConsumer {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<LogRecord, StreamLogError>>> + Send + '_>> {
        Box::pin(self.receive())
    }

    fn commit(
        &mut self,
        position: LogPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamLogError>> + Send + '_>> {
        Box::pin(async move { self.store_offset(position) })
    }
}

/// Builder for [`RedpandaStreamLog`].
///
/// # Example
///
/// ```no_run
/// use actionstream_redpanda::RedpandaStreamLog;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = RedpandaStreamLog::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topic("events")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaStreamLogBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaStreamLogBuilder {
    /// Comma-separated broker addresses (e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Envelope topic.
    ///
    /// Default: `"events"`
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all". Anything weaker disables producer idempotence.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group joined by [`StreamLog::subscribe`].
    ///
    /// Default: `"actionstream-processor"`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a group with no committed offset starts: "earliest" or "latest".
    ///
    /// Default: "earliest", so nothing appended before the first worker
    /// started is skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    fn producer_config(&self, brokers: &str, timeout: Duration) -> ClientConfig {
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .set("compression.type", self.compression.as_deref().unwrap_or("none"));
        config
    }

    /// Build the stream log.
    ///
    /// # Errors
    ///
    /// Returns [`StreamLogError::ConnectionFailed`] if brokers are not set or
    /// the producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaStreamLog, StreamLogError> {
        let brokers = self
            .brokers
            .clone()
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| StreamLogError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer =
            self.producer_config(&brokers, timeout).create().map_err(|e| {
                StreamLogError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let log = RedpandaStreamLog {
            producer,
            brokers,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            timeout,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %log.brokers,
            topic = %log.topic,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            compression = self.compression.as_deref().unwrap_or("none"),
            consumer_group = %log.consumer_group,
            "RedpandaStreamLog created"
        );

        Ok(log)
    }
}
