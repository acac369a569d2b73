//! Sink traits: where the processing worker writes, and where queries read.
//!
//! The history store is the idempotency fence. A record's presence means the
//! envelope was accepted exactly once; its `counter_applied` flag records
//! whether the counter step has completed as well. The counter store keys its
//! increment by event id so a redelivered envelope cannot be counted twice.

use crate::envelope::{EventId, HistoricalRecord, UserId};
use crate::error::StoreError;
use crate::stream_log::LogPosition;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by sink methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// What the history store knows about one event id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordStatus {
    /// The counter increment for this event has completed.
    pub counter_applied: bool,
}

/// Durable, queryable per-event history.
pub trait HistoryStore: Send + Sync {
    /// Insert one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if a record with the same event id exists,
    /// [`StoreError::Unavailable`] if the store cannot be reached.
    fn insert(&self, record: HistoricalRecord) -> StoreFuture<'_, ()>;

    /// Look up an event id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be reached.
    fn lookup(&self, event_id: EventId) -> StoreFuture<'_, Option<RecordStatus>>;

    /// Record that the counter step for `event_id` has completed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be reached.
    fn mark_counter_applied(&self, event_id: EventId) -> StoreFuture<'_, ()>;

    /// Number of records held for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be reached.
    fn count_for_user(&self, user_id: UserId) -> StoreFuture<'_, u64>;
}

/// Low-latency per-user action counters.
pub trait CounterStore: Send + Sync {
    /// Increment `user_id`'s counter unless `event_id` was already counted.
    ///
    /// Returns the counter value after the call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be reached,
    /// [`StoreError::Corrupt`] if the stored value is not a counter.
    fn increment_once(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, u64>;

    /// Current counter value; zero when the user has never been counted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be reached,
    /// [`StoreError::Corrupt`] if the stored value is not a counter.
    fn get(&self, user_id: UserId) -> StoreFuture<'_, u64>;
}

/// A stream record that can never be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// Where the record sits in the stream log
    pub position: LogPosition,
    /// Partition key, if any
    pub key: Option<String>,
    /// Raw payload, kept byte for byte
    pub payload: Vec<u8>,
    /// Why it was rejected
    pub reason: String,
}

/// Destination for records the worker gives up on.
pub trait DeadLetterSink: Send + Sync {
    /// Persist a dead letter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the sink cannot be reached.
    fn record(&self, letter: DeadLetter) -> StoreFuture<'_, ()>;
}
