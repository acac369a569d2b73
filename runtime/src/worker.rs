//! Processing worker: consume the stream log and apply each envelope to the
//! history store and the counter store.
//!
//! # Apply Sequence
//!
//! ```text
//! decode ─► lookup(eventId) ─┬─ applied ──────────────────────────────────► commit
//!                            ├─ recorded, counter pending ─┐
//!                            └─ absent ─► insert (fence) ──┴─► increment_once ─► mark applied ─► commit
//! ```
//!
//! The history insert is the idempotency fence: it is unique on `eventId`,
//! so however often a record is redelivered at most one row exists. The
//! counter increment comes second and is itself keyed by `eventId`, and the
//! row's `counter_applied` flag is set only once the increment has landed.
//! A crash at any point therefore leads to redelivery that finishes the
//! remaining steps without counting twice.
//!
//! # Failure Policy
//!
//! - A sink that is unavailable blocks the partition: the record is retried
//!   with exponential backoff and its offset is not committed
//! - A record that can never be applied (not an envelope, invalid, corrupt
//!   store data) goes to the dead-letter sink and is then committed
//! - A record that was already applied is committed without writes
//!
//! # States
//!
//! `Idle → Fetching → Applying → Committing → Idle`. `ShuttingDown` is
//! entered from `Idle` or `Fetching` on a normal stop, and straight from
//! `Applying` when shutdown arrives between retry attempts: the record is
//! then abandoned uncommitted, which means redelivery. Shutdown never
//! interrupts an apply attempt itself. A worker that is still joining its
//! consumer group stays `Idle` while it retries.
//!
//! Records are processed one at a time per worker, which preserves partition
//! order. Scale out by running more workers in the same consumer group.

use crate::metrics::WorkerMetrics;
use crate::retry::RetryPolicy;
use actionstream_core::{
    CounterStore, DeadLetter, DeadLetterSink, Envelope, HistoricalRecord, HistoryStore,
    LogConsumer, LogRecord, ProcessingError, RecordStatus, StoreError, StreamLog,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Backoff between attempts while a sink is unavailable.
    ///
    /// `max_retries` is ignored: a record is retried until it succeeds or the
    /// worker shuts down.
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(30))
                .multiplier(2.0)
                .jitter(true)
                .build(),
        }
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between records
    Idle,
    /// Waiting for the next record
    Fetching,
    /// Writing one record to the sinks
    Applying,
    /// Committing the record's offset
    Committing,
    /// Stopped or stopping
    ShuttingDown,
}

impl WorkerState {
    /// Lowercase name used in health reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Applying => "applying",
            Self::Committing => "committing",
            Self::ShuttingDown => "shutting_down",
        }
    }

    const fn gauge_value(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Fetching => 1.0,
            Self::Applying => 2.0,
            Self::Committing => 3.0,
            Self::ShuttingDown => 4.0,
        }
    }
}

/// Point-in-time counters for one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Records applied to both sinks
    pub applied: u64,
    /// Redelivered records that needed no writes
    pub duplicates: u64,
    /// Records sent to the dead-letter sink
    pub dead_lettered: u64,
    /// Attempts retried after a sink was unavailable
    pub retries: u64,
    /// Offset commits that failed
    pub commit_errors: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    applied: AtomicU64,
    duplicates: AtomicU64,
    dead_lettered: AtomicU64,
    retries: AtomicU64,
    commit_errors: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            applied: self.applied.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
        }
    }
}

/// The three sinks a worker writes to.
#[derive(Clone)]
pub struct WorkerSinks {
    /// Durable history; the idempotency fence
    pub history: Arc<dyn HistoryStore>,
    /// Realtime counters
    pub counter: Arc<dyn CounterStore>,
    /// Destination for records that can never be applied
    pub dead_letters: Arc<dyn DeadLetterSink>,
}

/// Control and observation handle for a running worker.
///
/// Dropping every handle is treated as a shutdown request.
#[derive(Clone)]
pub struct WorkerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<WorkerState>,
    stats: Arc<StatCounters>,
}

impl WorkerHandle {
    /// Ask the worker to stop after the current step.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }
}

/// Consumes the stream log and applies envelopes to the sinks.
///
/// # Example
///
/// ```ignore
/// let (worker, handle) = ProcessingWorker::new(log, sinks, WorkerConfig::default());
/// let task = tokio::spawn(worker.run());
///
/// // later
/// handle.shutdown();
/// let stats = task.await?;
/// ```
pub struct ProcessingWorker {
    log: Arc<dyn StreamLog>,
    sinks: WorkerSinks,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<WorkerState>,
    stats: Arc<StatCounters>,
}

impl ProcessingWorker {
    /// Create a worker and its control handle.
    #[must_use]
    pub fn new(
        log: Arc<dyn StreamLog>,
        sinks: WorkerSinks,
        config: WorkerConfig,
    ) -> (Self, WorkerHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WorkerState::Idle);
        let stats = Arc::new(StatCounters::default());

        let worker = Self {
            log,
            sinks,
            config,
            shutdown: shutdown_rx,
            state: state_tx,
            stats: Arc::clone(&stats),
        };
        let handle = WorkerHandle {
            shutdown: Arc::new(shutdown_tx),
            state: state_rx,
            stats,
        };
        (worker, handle)
    }

    /// Run until shutdown is requested or the stream log closes.
    ///
    /// Joining the consumer group is retried with backoff like any other
    /// unavailable dependency. The state is `ShuttingDown` once this returns,
    /// whatever the reason. Returns the final counters.
    pub async fn run(mut self) -> WorkerStats {
        self.consume().await;

        self.set_state(WorkerState::ShuttingDown);
        let stats = self.stats.snapshot();
        tracing::info!(
            applied = stats.applied,
            duplicates = stats.duplicates,
            dead_lettered = stats.dead_lettered,
            retries = stats.retries,
            commit_errors = stats.commit_errors,
            "Processing worker stopped"
        );
        stats
    }

    async fn consume(&mut self) {
        let Some(mut consumer) = self.subscribe().await else {
            return;
        };
        tracing::info!("Processing worker started");

        let mut receive_failures = 0;
        loop {
            self.set_state(WorkerState::Idle);
            if *self.shutdown.borrow() {
                return;
            }

            self.set_state(WorkerState::Fetching);
            let next = tokio::select! {
                biased;
                () = shutdown_signalled(&mut self.shutdown) => return,
                next = consumer.next() => next,
            };

            let record = match next {
                Some(Ok(record)) => {
                    receive_failures = 0;
                    record
                }
                Some(Err(e)) => {
                    let delay = self.config.retry.delay_for_attempt(receive_failures);
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Failed to receive from stream log"
                    );
                    receive_failures += 1;
                    if self.sleep_or_shutdown(delay).await {
                        return;
                    }
                    continue;
                }
                None => {
                    tracing::info!("Stream log closed");
                    return;
                }
            };

            self.set_state(WorkerState::Applying);
            if !self.process(&record).await {
                tracing::info!(
                    partition = record.partition,
                    offset = record.offset,
                    "Shutdown during retry, leaving record uncommitted"
                );
                return;
            }

            self.set_state(WorkerState::Committing);
            if let Err(e) = consumer.commit(record.position()).await {
                // The next successful commit covers this offset.
                self.stats.commit_errors.fetch_add(1, Ordering::Relaxed);
                WorkerMetrics::record_commit_error();
                tracing::warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Offset commit failed"
                );
            }
        }
    }

    /// Join the consumer group. `None` if shutdown came first.
    async fn subscribe(&mut self) -> Option<Box<dyn LogConsumer>> {
        let mut attempt = 0;
        loop {
            match self.log.subscribe().await {
                Ok(consumer) => return Some(consumer),
                Err(e) => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    WorkerMetrics::record_retry();
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Failed to join consumer group, retrying"
                    );
                    if self.sleep_or_shutdown(delay).await {
                        return None;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Apply one record until it is done. Returns `false` if shutdown
    /// interrupted the retries and the record must not be committed.
    async fn process(&mut self, record: &LogRecord) -> bool {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            match self.apply(record).await {
                Ok(()) => {
                    self.stats.applied.fetch_add(1, Ordering::Relaxed);
                    WorkerMetrics::record_applied(started.elapsed());
                    return true;
                }
                Err(ProcessingError::DuplicateApplication(event_id)) => {
                    self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                    WorkerMetrics::record_duplicate();
                    tracing::debug!(
                        %event_id,
                        partition = record.partition,
                        offset = record.offset,
                        "Already applied, skipping"
                    );
                    return true;
                }
                Err(ProcessingError::Fatal(reason)) => {
                    return self.dead_letter(record, reason).await;
                }
                Err(ProcessingError::DependencyUnavailable(reason)) => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    WorkerMetrics::record_retry();
                    tracing::warn!(
                        partition = record.partition,
                        offset = record.offset,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %reason,
                        "Sink unavailable, retrying record"
                    );
                    if self.sleep_or_shutdown(delay).await {
                        return false;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn apply(&self, record: &LogRecord) -> Result<(), ProcessingError> {
        let envelope = Envelope::from_bytes(&record.payload)?;
        let event_id = envelope.event_id().clone();

        match self.sinks.history.lookup(event_id.clone()).await? {
            Some(RecordStatus {
                counter_applied: true,
            }) => return Err(ProcessingError::DuplicateApplication(event_id)),
            Some(RecordStatus {
                counter_applied: false,
            }) => {
                tracing::debug!(%event_id, "History recorded, resuming counter step");
            }
            None => match self
                .sinks
                .history
                .insert(HistoricalRecord::from(&envelope))
                .await
            {
                Ok(()) => {}
                Err(StoreError::Duplicate(_)) => {
                    tracing::debug!(%event_id, "Concurrent insert won the fence, resuming counter step");
                }
                Err(e) => return Err(e.into()),
            },
        }

        let actions = self
            .sinks
            .counter
            .increment_once(envelope.user_id(), event_id.clone())
            .await?;
        self.sinks.history.mark_counter_applied(event_id.clone()).await?;

        tracing::debug!(
            %event_id,
            user_id = %envelope.user_id(),
            actions,
            "Envelope applied"
        );
        Ok(())
    }

    async fn dead_letter(&mut self, record: &LogRecord, reason: String) -> bool {
        tracing::error!(
            partition = record.partition,
            offset = record.offset,
            reason = %reason,
            "Record cannot be applied, routing to dead-letter sink"
        );
        let letter = DeadLetter {
            position: record.position(),
            key: record.key.clone(),
            payload: record.payload.clone(),
            reason,
        };

        let mut attempt = 0;
        loop {
            match self.sinks.dead_letters.record(letter.clone()).await {
                Ok(()) => {
                    self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    WorkerMetrics::record_dead_letter();
                    return true;
                }
                Err(e) => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    WorkerMetrics::record_retry();
                    tracing::warn!(
                        partition = record.partition,
                        offset = record.offset,
                        attempt,
                        error = %e,
                        "Dead-letter write failed, retrying"
                    );
                    if self.sleep_or_shutdown(delay).await {
                        return false;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Returns `true` if shutdown was requested before `delay` elapsed.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = shutdown_signalled(&mut self.shutdown) => true,
            () = tokio::time::sleep(delay) => false,
        }
    }

    fn set_state(&self, state: WorkerState) {
        WorkerMetrics::record_state(state.gauge_value());
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Resolves once shutdown is requested or every handle is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
