//! `PostgreSQL` adapters for Actionstream.
//!
//! - [`PostgresHistoryStore`]: the durable per-event history, and the
//!   idempotency fence for the processing worker
//! - [`DeadLetterQueue`]: stream records the worker could not apply
//!
//! Both share one pool and one set of migrations under `migrations/`.
//!
//! # Example
//!
//! ```no_run
//! use actionstream_postgres::{DeadLetterQueue, PostgresHistoryStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let history = PostgresHistoryStore::connect("postgres://localhost/actionstream", 10).await?;
//! history.migrate().await?;
//! let dlq = DeadLetterQueue::new(history.pool().clone());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letter_queue;
mod history;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedEnvelope};
pub use history::PostgresHistoryStore;

use actionstream_core::StoreError;

/// SQLSTATE for a unique violation; inserts absorb it with `ON CONFLICT`.
const UNIQUE_VIOLATION: &str = "23505";

/// Classify a driver error.
///
/// Rows that cannot be decoded, and writes the server refuses because of the
/// data itself (SQLSTATE class 22, data exception, and class 23, integrity
/// constraint violation), are corrupt: retrying the same row can never
/// succeed. Everything else is an outage.
pub(crate) fn store_error(store: &'static str, error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Decode(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::corrupt(store, error),
        sqlx::Error::Database(db) if rejects_data(db.code().as_deref()) => {
            StoreError::corrupt(store, error)
        }
        _ => StoreError::unavailable(store, error),
    }
}

fn rejects_data(sqlstate: Option<&str>) -> bool {
    match sqlstate {
        Some(code) if code.starts_with("22") => true,
        Some(code) => code.starts_with("23") && code != UNIQUE_VIOLATION,
        None => false,
    }
}
