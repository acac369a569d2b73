//! Stream log abstraction: the durable, partitioned, replayable buffer between
//! the ingress gateway and the processing worker.
//!
//! # Semantics
//!
//! - **Keyed partitioning**: records with the same key land on the same partition
//! - **Per-partition order**: a consumer sees one partition's records in append order
//! - **At-least-once**: a record is redelivered until its offset is committed
//! - **Explicit commit**: nothing is committed implicitly on receive. A consumer
//!   that disappears without committing causes redelivery to the next member of
//!   its consumer group, starting after the last committed offset
//!
//! ```rust,ignore
//! let mut consumer = log.subscribe().await?;
//! while let Some(record) = consumer.next().await {
//!     let record = record?;
//!     apply(&record).await?;
//!     consumer.commit(record.position()).await?;
//! }
//! ```
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` so the log can be shared as
//! `Arc<dyn StreamLog>` between HTTP handlers and workers.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during stream log operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamLogError {
    /// Failed to connect to the brokers
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The append was not acknowledged
    #[error("Append failed: {0}")]
    AppendFailed(String),

    /// Failed to join the consumer group
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Failed to receive the next record
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to commit a consumer offset
    #[error("Commit failed for partition {partition} offset {offset}: {reason}")]
    CommitFailed {
        /// Partition being committed
        partition: i32,
        /// Offset being committed
        offset: i64,
        /// Broker message
        reason: String,
    },
}

/// Where an appended record landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Partition the record was written to
    pub partition: i32,
    /// Offset within that partition
    pub offset: i64,
}

/// Position of one record in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogPosition {
    /// Partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// One record delivered to a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition the record came from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Partition key, if the producer set one
    pub key: Option<String>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// The record's position, used to commit it.
    #[must_use]
    pub const fn position(&self) -> LogPosition {
        LogPosition {
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Producer side of the stream log.
pub trait StreamLog: Send + Sync {
    /// Append a payload under `key` and wait for a durable acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`StreamLogError::AppendFailed`] if the brokers do not acknowledge.
    fn append(
        &self,
        key: String,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<AppendReceipt, StreamLogError>> + Send + '_>>;

    /// Join the configured consumer group and return a consumer positioned
    /// after the group's last committed offsets.
    ///
    /// # Errors
    ///
    /// Returns [`StreamLogError::SubscriptionFailed`] if the group cannot be joined.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LogConsumer>, StreamLogError>> + Send + '_>>;
}

/// Consumer side of the stream log. One consumer is driven by one task.
pub trait LogConsumer: Send {
    /// Wait for the next record.
    ///
    /// Returns `None` once the log is closed.
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<LogRecord, StreamLogError>>> + Send + '_>>;

    /// Mark every record up to and including `position` as processed for this group.
    ///
    /// # Errors
    ///
    /// Returns [`StreamLogError::CommitFailed`] if the offset was not stored.
    fn commit(
        &mut self,
        position: LogPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamLogError>> + Send + '_>>;
}
