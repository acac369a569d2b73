//! # Actionstream Testing
//!
//! Testing utilities for the Actionstream pipeline.
//!
//! This crate provides:
//! - [`InMemoryStreamLog`]: partitioned log with per-group committed offsets and redelivery
//! - [`InMemoryHistoryStore`], [`InMemoryCounterStore`], [`InMemoryDeadLetterSink`]
//! - [`Faults`]: outage, corruption and latency injection for the stores
//! - Fixtures and proptest strategies for envelopes
//!
//! ## Example
//!
//! ```ignore
//! use actionstream_testing::{fixtures, InMemoryStreamLog, InMemoryHistoryStore};
//!
//! #[tokio::test]
//! async fn test_worker_applies_envelope() {
//!     let log = InMemoryStreamLog::new(3);
//!     let history = InMemoryHistoryStore::new();
//!     let envelope = fixtures::envelope(1, "click");
//!     log.append(envelope.partition_key(), envelope.to_bytes().unwrap()).await.unwrap();
//!     // ... run a worker against `log` and `history`
//! }
//! ```

pub mod faults;
pub mod stores;
pub mod stream_log;

/// Envelope fixtures.
pub mod fixtures {
    #![allow(clippy::expect_used)]

    use actionstream_core::{Envelope, IngestRequest, UserId};

    /// Fixed timestamp used by fixtures (2025-01-01 00:00:00 UTC).
    pub const TEST_TIMESTAMP: &str = "2025-01-01T00:00:00Z";

    /// A valid request for `user_id` doing `action`.
    #[must_use]
    pub fn request(user_id: i64, action: &str) -> IngestRequest {
        IngestRequest::new(user_id, action, TEST_TIMESTAMP)
    }

    /// A validated envelope with a fresh event id.
    ///
    /// # Panics
    ///
    /// Panics if `user_id` or `action` is invalid.
    #[must_use]
    pub fn envelope(user_id: i64, action: &str) -> Envelope {
        Envelope::validate(request(user_id, action)).expect("fixture envelope should be valid")
    }

    /// A validated envelope with a caller-chosen event id.
    ///
    /// # Panics
    ///
    /// Panics if any field is invalid.
    #[must_use]
    pub fn envelope_with_id(user_id: i64, action: &str, event_id: &str) -> Envelope {
        Envelope::validate(request(user_id, action).with_event_id(event_id))
            .expect("fixture envelope should be valid")
    }

    /// A positive user id.
    ///
    /// # Panics
    ///
    /// Panics if `raw <= 0`.
    #[must_use]
    pub fn user(raw: i64) -> UserId {
        UserId::new(raw).expect("fixture user id should be positive")
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use actionstream_core::IngestRequest;
    use proptest::prelude::*;

    /// Requests that always pass validation.
    pub fn valid_request() -> impl Strategy<Value = IngestRequest> {
        (1..10_000_i64, "[a-z][a-z_]{0,15}", 0..86_400_i64).prop_map(|(user_id, action, secs)| {
            let timestamp = chrono::DateTime::from_timestamp(1_735_689_600 + secs, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| super::fixtures::TEST_TIMESTAMP.to_string());
            IngestRequest::new(user_id, action, timestamp)
        })
    }

    /// A short interleaved sequence of valid requests over a few users.
    pub fn request_batch(max_len: usize) -> impl Strategy<Value = Vec<IngestRequest>> {
        prop::collection::vec(
            (1..5_i64, "[a-z]{1,8}").prop_map(|(user_id, action)| {
                IngestRequest::new(user_id, action, super::fixtures::TEST_TIMESTAMP)
            }),
            1..max_len.max(2),
        )
    }
}

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Honours `RUST_LOG`; output is captured by the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("actionstream=debug")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use faults::{Fault, Faults};
pub use stores::{InMemoryCounterStore, InMemoryDeadLetterSink, InMemoryHistoryStore};
pub use stream_log::InMemoryStreamLog;
