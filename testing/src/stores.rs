//! In-memory sinks for fast, deterministic pipeline tests.
//!
//! - [`InMemoryHistoryStore`]: `HashMap` keyed by event id, unique like the real table
//! - [`InMemoryCounterStore`]: per-user counters plus a set of counted event ids
//! - [`InMemoryDeadLetterSink`]: captures dead letters for assertions
//!
//! Every store carries a [`Faults`] handle for injecting outages.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use crate::faults::Faults;
use actionstream_core::{
    CounterStore, DeadLetter, DeadLetterSink, EventId, HistoricalRecord, HistoryStore,
    RecordStatus, StoreError, StoreFuture, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug)]
struct StoredRecord {
    record: HistoricalRecord,
    counter_applied: bool,
}

/// In-memory history store.
///
/// # Example
///
/// ```
/// use actionstream_core::{Envelope, HistoricalRecord, HistoryStore, IngestRequest};
/// use actionstream_testing::InMemoryHistoryStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryHistoryStore::new();
/// let envelope = Envelope::validate(IngestRequest::new(1, "click", "2024-01-01T00:00:00Z"))?;
///
/// store.insert(HistoricalRecord::from(&envelope)).await?;
/// assert_eq!(store.count_for_user(envelope.user_id()).await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryHistoryStore {
    records: Arc<RwLock<HashMap<EventId, StoredRecord>>>,
    faults: Faults,
}

impl InMemoryHistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection handle.
    #[must_use]
    pub const fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Fetch one stored record.
    #[must_use]
    pub fn get(&self, event_id: &EventId) -> Option<HistoricalRecord> {
        self.records
            .read()
            .unwrap()
            .get(event_id)
            .map(|stored| stored.record.clone())
    }

    /// Whether the counter step for `event_id` has been marked complete.
    #[must_use]
    pub fn counter_applied(&self, event_id: &EventId) -> bool {
        self.records
            .read()
            .unwrap()
            .get(event_id)
            .is_some_and(|stored| stored.counter_applied)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn insert(&self, record: HistoricalRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.faults.check("history", "insert").await?;
            let mut records = self.records.write().unwrap();
            if records.contains_key(&record.event_id) {
                return Err(StoreError::Duplicate(record.event_id));
            }
            records.insert(
                record.event_id.clone(),
                StoredRecord {
                    record,
                    counter_applied: false,
                },
            );
            Ok(())
        })
    }

    fn lookup(&self, event_id: EventId) -> StoreFuture<'_, Option<RecordStatus>> {
        Box::pin(async move {
            self.faults.check("history", "lookup").await?;
            Ok(self
                .records
                .read()
                .unwrap()
                .get(&event_id)
                .map(|stored| RecordStatus {
                    counter_applied: stored.counter_applied,
                }))
        })
    }

    fn mark_counter_applied(&self, event_id: EventId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.faults.check("history", "mark_counter_applied").await?;
            if let Some(stored) = self.records.write().unwrap().get_mut(&event_id) {
                stored.counter_applied = true;
            }
            Ok(())
        })
    }

    fn count_for_user(&self, user_id: UserId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.faults.check("history", "count_for_user").await?;
            let count = self
                .records
                .read()
                .unwrap()
                .values()
                .filter(|stored| stored.record.user_id == user_id)
                .count();
            Ok(count as u64)
        })
    }
}

#[derive(Debug, Default)]
struct CounterState {
    counters: HashMap<UserId, u64>,
    counted: HashSet<EventId>,
}

/// In-memory counter store with the same once-per-event semantics as the Redis script.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCounterStore {
    state: Arc<RwLock<CounterState>>,
    faults: Faults,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection handle.
    #[must_use]
    pub const fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Counter value without going through the trait (no fault injection).
    #[must_use]
    pub fn value(&self, user_id: UserId) -> u64 {
        self.state
            .read()
            .unwrap()
            .counters
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Overwrite a counter, e.g. to simulate drift from the history store.
    pub fn set(&self, user_id: UserId, value: u64) {
        self.state.write().unwrap().counters.insert(user_id, value);
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment_once(&self, user_id: UserId, event_id: EventId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.faults.check("counter", "increment_once").await?;
            let mut state = self.state.write().unwrap();
            let first_time = state.counted.insert(event_id);
            let counter = state.counters.entry(user_id).or_default();
            if first_time {
                *counter += 1;
            }
            Ok(*counter)
        })
    }

    fn get(&self, user_id: UserId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.faults.check("counter", "get").await?;
            Ok(self.value(user_id))
        })
    }
}

/// Dead-letter sink that keeps everything in a `Vec`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
    faults: Faults,
}

impl InMemoryDeadLetterSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection handle.
    #[must_use]
    pub const fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Everything recorded so far, oldest first.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().unwrap().clone()
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record(&self, letter: DeadLetter) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.faults.check("dead_letter", "record").await?;
            self.letters.write().unwrap().push(letter);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fixtures::envelope;

    #[tokio::test]
    async fn history_rejects_second_insert_of_same_event() {
        let store = InMemoryHistoryStore::new();
        let record = HistoricalRecord::from(&envelope(1, "click"));

        store.insert(record.clone()).await.unwrap();
        let err = store.insert(record.clone()).await.unwrap_err();

        assert_eq!(err, StoreError::Duplicate(record.event_id));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lookup_reports_counter_flag() {
        let store = InMemoryHistoryStore::new();
        let record = HistoricalRecord::from(&envelope(1, "click"));
        let id = record.event_id.clone();

        assert_eq!(store.lookup(id.clone()).await.unwrap(), None);
        store.insert(record).await.unwrap();
        assert_eq!(
            store.lookup(id.clone()).await.unwrap(),
            Some(RecordStatus { counter_applied: false })
        );
        store.mark_counter_applied(id.clone()).await.unwrap();
        assert_eq!(
            store.lookup(id).await.unwrap(),
            Some(RecordStatus { counter_applied: true })
        );
    }

    #[tokio::test]
    async fn counter_ignores_repeated_event_id() {
        let store = InMemoryCounterStore::new();
        let user = UserId::new(7).expect("positive");
        let id = EventId::generate();

        assert_eq!(store.increment_once(user, id.clone()).await.unwrap(), 1);
        assert_eq!(store.increment_once(user, id).await.unwrap(), 1);
        assert_eq!(store.increment_once(user, EventId::generate()).await.unwrap(), 2);
        assert_eq!(store.get(user).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn counter_get_defaults_to_zero() {
        let store = InMemoryCounterStore::new();
        let user = UserId::new(99).expect("positive");
        assert_eq!(store.get(user).await.unwrap(), 0);
    }
}
