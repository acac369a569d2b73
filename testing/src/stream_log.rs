//! In-memory stream log with Kafka-like delivery semantics.
//!
//! - Keys are hashed onto a fixed number of partitions
//! - Each partition is an append-only `Vec`
//! - Committed offsets are tracked per consumer group
//! - A new consumer resumes from the group's committed offsets, so records
//!   received but never committed are delivered again
//!
//! Every consumer of a group reads every partition; the log does not model
//! partition assignment between concurrent group members.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use actionstream_core::{
    AppendReceipt, LogConsumer, LogPosition, LogRecord, StreamLog, StreamLogError,
};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct LogState {
    partitions: Vec<Vec<(Option<String>, Vec<u8>)>>,
    committed: HashMap<String, Vec<i64>>,
    failing_appends: usize,
    failing_commits: usize,
    down: bool,
}

/// In-memory [`StreamLog`].
///
/// # Example
///
/// ```
/// use actionstream_core::{LogConsumer, StreamLog};
/// use actionstream_testing::InMemoryStreamLog;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = InMemoryStreamLog::new(3);
/// log.append("1".to_string(), b"hello".to_vec()).await?;
///
/// let mut consumer = log.subscribe().await?;
/// let record = consumer.next().await.unwrap()?;
/// consumer.commit(record.position()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStreamLog {
    state: Arc<Mutex<LogState>>,
    appended: Arc<watch::Sender<u64>>,
    group: String,
}

impl InMemoryStreamLog {
    /// Create a log with `partitions` partitions and the default consumer group.
    #[must_use]
    pub fn new(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let (appended, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(LogState {
                partitions: vec![Vec::new(); partitions],
                ..LogState::default()
            })),
            appended: Arc::new(appended),
            group: "actionstream-workers".to_string(),
        }
    }

    /// Handle on the same log that subscribes as a different consumer group.
    #[must_use]
    pub fn with_group(&self, group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..self.clone()
        }
    }

    /// Partition a key maps to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let count = self.state.lock().unwrap().partitions.len();
        partition_for(key, count)
    }

    /// Fail the next `times` appends.
    pub fn fail_next_appends(&self, times: usize) {
        self.state.lock().unwrap().failing_appends += times;
    }

    /// Fail the next `times` offset commits.
    pub fn fail_next_commits(&self, times: usize) {
        self.state.lock().unwrap().failing_commits += times;
    }

    /// Fail every append, subscribe, and commit until cleared.
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    /// Total number of records across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .partitions
            .iter()
            .map(Vec::len)
            .sum()
    }

    /// Check if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payloads of one partition, in offset order.
    #[must_use]
    pub fn payloads(&self, partition: i32) -> Vec<Vec<u8>> {
        let state = self.state.lock().unwrap();
        usize::try_from(partition)
            .ok()
            .and_then(|index| state.partitions.get(index))
            .map(|records| records.iter().map(|(_, payload)| payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Next offset this handle's group will read from `partition`.
    #[must_use]
    pub fn committed_offset(&self, partition: i32) -> i64 {
        let state = self.state.lock().unwrap();
        usize::try_from(partition)
            .ok()
            .and_then(|index| {
                state
                    .committed
                    .get(&self.group)
                    .and_then(|offsets| offsets.get(index))
            })
            .copied()
            .unwrap_or(0)
    }

    /// Whether every appended record has been committed by this handle's group.
    #[must_use]
    pub fn fully_committed(&self) -> bool {
        let state = self.state.lock().unwrap();
        let committed = state.committed.get(&self.group);
        state.partitions.iter().enumerate().all(|(index, records)| {
            let next = committed.and_then(|o| o.get(index)).copied().unwrap_or(0);
            next >= records.len() as i64
        })
    }
}

fn partition_for(key: &str, partitions: usize) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let index = hasher.finish() % partitions.max(1) as u64;
    i32::try_from(index).unwrap_or(0)
}

impl StreamLog for InMemoryStreamLog {
    fn append(
        &self,
        key: String,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<AppendReceipt, StreamLogError>> + Send + '_>> {
        Box::pin(async move {
            let receipt = {
                let mut state = self.state.lock().unwrap();
                if state.down {
                    return Err(StreamLogError::AppendFailed("injected outage".to_string()));
                }
                if state.failing_appends > 0 {
                    state.failing_appends -= 1;
                    return Err(StreamLogError::AppendFailed("injected failure".to_string()));
                }

                let partition = partition_for(&key, state.partitions.len());
                let records = &mut state.partitions[partition as usize];
                records.push((Some(key), payload));
                AppendReceipt {
                    partition,
                    offset: records.len() as i64 - 1,
                }
            };

            self.appended.send_modify(|count| *count += 1);
            Ok(receipt)
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn LogConsumer>, StreamLogError>> + Send + '_>>
    {
        Box::pin(async move {
            let cursors = {
                let mut state = self.state.lock().unwrap();
                if state.down {
                    return Err(StreamLogError::SubscriptionFailed(
                        "injected outage".to_string(),
                    ));
                }
                let partitions = state.partitions.len();
                state
                    .committed
                    .entry(self.group.clone())
                    .or_insert_with(|| vec![0; partitions])
                    .clone()
            };

            let consumer: Box<dyn LogConsumer> = Box::new(InMemoryConsumer {
                state: Arc::clone(&self.state),
                appended: self.appended.subscribe(),
                group: self.group.clone(),
                cursors,
                next_partition: 0,
            });
            Ok(consumer)
        })
    }
}

/// Consumer returned by [`InMemoryStreamLog::subscribe`].
struct InMemoryConsumer {
    state: Arc<Mutex<LogState>>,
    appended: watch::Receiver<u64>,
    group: String,
    cursors: Vec<i64>,
    next_partition: usize,
}

impl InMemoryConsumer {
    /// Round-robin over partitions so no partition starves.
    fn poll_record(&mut self) -> Option<LogRecord> {
        let state = self.state.lock().unwrap();
        let count = state.partitions.len();
        for step in 0..count {
            let index = (self.next_partition + step) % count;
            let cursor = self.cursors[index];
            if let Some((key, payload)) = state.partitions[index].get(cursor as usize) {
                self.cursors[index] = cursor + 1;
                self.next_partition = (index + 1) % count;
                return Some(LogRecord {
                    partition: index as i32,
                    offset: cursor,
                    key: key.clone(),
                    payload: payload.clone(),
                });
            }
        }
        None
    }
}

impl LogConsumer for InMemoryConsumer {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<LogRecord, StreamLogError>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                self.appended.borrow_and_update();
                if let Some(record) = self.poll_record() {
                    return Some(Ok(record));
                }
                if self.appended.changed().await.is_err() {
                    return None;
                }
            }
        })
    }

    fn commit(
        &mut self,
        position: LogPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamLogError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.down {
                return Err(StreamLogError::CommitFailed {
                    partition: position.partition,
                    offset: position.offset,
                    reason: "injected outage".to_string(),
                });
            }
            if state.failing_commits > 0 {
                state.failing_commits -= 1;
                return Err(StreamLogError::CommitFailed {
                    partition: position.partition,
                    offset: position.offset,
                    reason: "injected failure".to_string(),
                });
            }
            let partitions = state.partitions.len();
            let offsets = state
                .committed
                .entry(self.group.clone())
                .or_insert_with(|| vec![0; partitions]);
            if let Some(next) = offsets.get_mut(position.partition as usize) {
                *next = (*next).max(position.offset + 1);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_always_lands_on_same_partition() {
        let log = InMemoryStreamLog::new(4);
        let first = log.append("42".into(), b"a".to_vec()).await.unwrap();
        let second = log.append("42".into(), b"b".to_vec()).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
        assert_eq!(log.partition_for("42"), first.partition);
    }

    #[tokio::test]
    async fn uncommitted_records_are_redelivered_to_next_consumer() {
        let log = InMemoryStreamLog::new(1);
        log.append("1".into(), b"a".to_vec()).await.unwrap();
        log.append("1".into(), b"b".to_vec()).await.unwrap();

        let mut first = log.subscribe().await.unwrap();
        let a = first.next().await.unwrap().unwrap();
        first.commit(a.position()).await.unwrap();
        let b = first.next().await.unwrap().unwrap();
        assert_eq!(b.payload, b"b");
        drop(first);

        let mut second = log.subscribe().await.unwrap();
        let redelivered = second.next().await.unwrap().unwrap();
        assert_eq!(redelivered.payload, b"b");
        assert_eq!(redelivered.offset, 1);
    }

    #[tokio::test]
    async fn consumer_waits_for_new_records() {
        let log = InMemoryStreamLog::new(2);
        let mut consumer = log.subscribe().await.unwrap();

        let producer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.append("9".into(), b"late".to_vec()).await.unwrap();
        });

        let record = tokio::time::timeout(Duration::from_secs(1), consumer.next())
            .await
            .expect("record should arrive")
            .unwrap()
            .unwrap();
        assert_eq!(record.payload, b"late");
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let log = InMemoryStreamLog::new(1);
        log.append("1".into(), b"a".to_vec()).await.unwrap();

        let mut workers = log.subscribe().await.unwrap();
        let record = workers.next().await.unwrap().unwrap();
        workers.commit(record.position()).await.unwrap();
        assert!(log.fully_committed());

        let audit = log.with_group("audit");
        assert!(!audit.fully_committed());
        let mut auditor = audit.subscribe().await.unwrap();
        assert_eq!(auditor.next().await.unwrap().unwrap().payload, b"a");
    }

    #[tokio::test]
    async fn failed_commit_leaves_offset_until_a_later_commit() {
        let log = InMemoryStreamLog::new(1);
        log.append("1".into(), b"a".to_vec()).await.unwrap();
        log.append("1".into(), b"b".to_vec()).await.unwrap();
        log.fail_next_commits(1);

        let mut consumer = log.subscribe().await.unwrap();
        let a = consumer.next().await.unwrap().unwrap();
        assert!(consumer.commit(a.position()).await.is_err());
        assert_eq!(log.committed_offset(0), 0);

        let b = consumer.next().await.unwrap().unwrap();
        consumer.commit(b.position()).await.unwrap();
        assert_eq!(log.committed_offset(0), 2);
    }

    #[tokio::test]
    async fn injected_append_failures_are_consumed() {
        let log = InMemoryStreamLog::new(1);
        log.fail_next_appends(1);

        assert!(log.append("1".into(), b"a".to_vec()).await.is_err());
        assert!(log.append("1".into(), b"a".to_vec()).await.is_ok());
        assert_eq!(log.len(), 1);
    }
}
