//! Dead Letter Queue (DLQ) for stream records the worker gave up on.
//!
//! Each entry keeps the raw payload byte for byte together with the log
//! position it came from, so an operator can inspect it, fix the cause and
//! re-ingest it by hand. Entries are unique per log position: a record that
//! is dead-lettered again after a redelivery updates the existing row.

use crate::store_error;
use actionstream_core::{DeadLetter, DeadLetterSink, LogPosition, StoreError, StoreFuture};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

const STORE: &str = "dead_letter";

/// Status of a failed envelope in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Waiting for an operator
    Pending,
    /// Fixed and re-ingested
    Resolved,
    /// Dropped for good
    Discarded,
}

impl DLQStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::corrupt(STORE, format!("invalid DLQ status: {s}"))),
        }
    }
}

/// An entry in the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct FailedEnvelope {
    /// Entry id
    pub id: i64,
    /// Stream log position of the record
    pub position: LogPosition,
    /// Partition key, if the record had one
    pub partition_key: Option<String>,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Why it was rejected (latest failure)
    pub error_message: String,
    /// How many times the same position was dead-lettered
    pub failure_count: i32,
    /// First time the record was dead-lettered
    pub first_failed_at: DateTime<Utc>,
    /// Most recent time
    pub last_failed_at: DateTime<Utc>,
    /// Current status
    pub status: DLQStatus,
    /// When it was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Operator notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-based Dead Letter Queue.
///
/// # Example
///
/// ```no_run
/// use actionstream_postgres::DeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
/// for entry in dlq.list_pending(100).await? {
///     println!("{} at {}: {}", entry.id, entry.position, entry.error_message);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a queue over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add (or refresh) the entry for `letter.position`.
    ///
    /// Returns the entry id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    pub async fn add_entry(&self, letter: &DeadLetter) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_envelopes (
                log_partition, log_offset, partition_key, payload, error_message
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (log_partition, log_offset) DO UPDATE
            SET error_message = EXCLUDED.error_message,
                failure_count = failed_envelopes.failure_count + 1,
                last_failed_at = NOW()
            RETURNING id
            ",
        )
        .bind(letter.position.partition)
        .bind(letter.position.offset)
        .bind(letter.key.as_deref())
        .bind(&letter.payload)
        .bind(&letter.reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error(STORE, &e))?;

        tracing::warn!(
            dlq_id = id,
            position = %letter.position,
            key = letter.key.as_deref().unwrap_or(""),
            error = %letter.reason,
            "Envelope added to Dead Letter Queue"
        );

        metrics::counter!("actionstream_dlq_added_total").increment(1);

        Ok(id)
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedEnvelope>, StoreError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// Entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails,
    /// [`StoreError::Corrupt`] if a row cannot be read.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedEnvelope>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT
                id, log_partition, log_offset, partition_key, payload, error_message,
                failure_count, first_failed_at, last_failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM failed_envelopes
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error(STORE, &e))?;

        rows.iter().map(Self::row_to_failed_envelope).collect()
    }

    /// One entry by id; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<FailedEnvelope>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT
                id, log_partition, log_offset, partition_key, payload, error_message,
                failure_count, first_failed_at, last_failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM failed_envelopes
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(STORE, &e))?;

        row.as_ref().map(Self::row_to_failed_envelope).transpose()
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_envelopes
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(STORE, &e))?;

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");
        metrics::counter!("actionstream_dlq_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry discarded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_envelopes
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(STORE, &e))?;

        tracing::warn!(dlq_id = id, reason, "DLQ entry marked as discarded");
        metrics::counter!("actionstream_dlq_discarded_total").increment(1);
        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_envelopes WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| store_error(STORE, &e))?;
        Ok(count)
    }

    fn row_to_failed_envelope(row: &sqlx::postgres::PgRow) -> Result<FailedEnvelope, StoreError> {
        let read = |e: sqlx::Error| store_error(STORE, &e);
        let status: String = row.try_get("status").map_err(read)?;

        Ok(FailedEnvelope {
            id: row.try_get("id").map_err(read)?,
            position: LogPosition {
                partition: row.try_get("log_partition").map_err(read)?,
                offset: row.try_get("log_offset").map_err(read)?,
            },
            partition_key: row.try_get("partition_key").map_err(read)?,
            payload: row.try_get("payload").map_err(read)?,
            error_message: row.try_get("error_message").map_err(read)?,
            failure_count: row.try_get("failure_count").map_err(read)?,
            first_failed_at: row.try_get("first_failed_at").map_err(read)?,
            last_failed_at: row.try_get("last_failed_at").map_err(read)?,
            status: DLQStatus::parse(&status)?,
            resolved_at: row.try_get("resolved_at").map_err(read)?,
            resolved_by: row.try_get("resolved_by").map_err(read)?,
            resolution_notes: row.try_get("resolution_notes").map_err(read)?,
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn record(&self, letter: DeadLetter) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.add_entry(&letter).await.map(|_| ()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in &[DLQStatus::Pending, DLQStatus::Resolved, DLQStatus::Discarded] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid_is_corrupt() {
        assert!(matches!(
            DLQStatus::parse("processing"),
            Err(StoreError::Corrupt { store: "dead_letter", .. })
        ));
    }
}
