//! # Actionstream Core
//!
//! Core types and traits for the Actionstream ingestion pipeline.
//!
//! Actionstream accepts discrete user-action events over HTTP, appends them to a
//! partitioned stream log, and fans them out to two independent sinks:
//!
//! - a **counter store** (Redis) answering realtime aggregate queries
//! - a **history store** (Postgres) holding one durable row per event
//!
//! ## Data Flow
//!
//! ```text
//! caller ──► Ingress Gateway ──► Stream Log ──► Processing Worker ──┬──► History Store
//!                                                                   └──► Counter Store
//! caller ◄── Query Service ◄────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Model
//!
//! - The stream log delivers **at least once**, ordered per partition
//! - Envelopes are partitioned by `userId`, so one user's actions are applied in order
//! - The history insert is the **idempotency fence**: a uniqueness violation on
//!   `eventId` means "already applied", never "apply again"
//! - The counter increment happens after the fence and is itself keyed by `eventId`
//!
//! This crate holds no I/O. Adapters live in `actionstream-redpanda`,
//! `actionstream-postgres` and `actionstream-redis`; in-memory doubles live in
//! `actionstream-testing`.

pub mod envelope;
pub mod error;
pub mod sink;
pub mod stream_log;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use envelope::{Envelope, EventId, HistoricalRecord, IngestRequest, UserId};
pub use error::{IngestError, ProcessingError, QueryError, StoreError, ValidationError};
pub use sink::{CounterStore, DeadLetter, DeadLetterSink, HistoryStore, RecordStatus, StoreFuture};
pub use stream_log::{
    AppendReceipt, LogConsumer, LogPosition, LogRecord, StreamLog, StreamLogError,
};
