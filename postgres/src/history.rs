//! History store backed by the `events` table.

use crate::store_error;
use actionstream_core::{
    EventId, HistoricalRecord, HistoryStore, RecordStatus, StoreError, StoreFuture, UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

const STORE: &str = "history";

/// `PostgreSQL` history store.
///
/// The primary key on `event_id` is the deduplication fence: an insert that
/// conflicts affects no rows and is reported as [`StoreError::Duplicate`].
#[derive(Clone, Debug)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::unavailable(STORE, e))?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations for both the history and dead-letter tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::unavailable(STORE, format!("migration failed: {e}")))?;
        tracing::info!("History store migrations applied");
        Ok(())
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query. Used by readiness checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(STORE, &e))?;
        Ok(())
    }

    async fn insert_record(&self, record: HistoricalRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO events (event_id, user_id, action, timestamp, raw_timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(record.event_id.as_str())
        .bind(record.user_id.get())
        .bind(&record.action)
        .bind(record.occurred_at)
        .bind(&record.raw_timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(STORE, &e))?;

        if result.rows_affected() == 0 {
            tracing::debug!(event_id = %record.event_id, "Event already recorded");
            return Err(StoreError::Duplicate(record.event_id));
        }
        Ok(())
    }

    async fn lookup_record(&self, event_id: EventId) -> Result<Option<RecordStatus>, StoreError> {
        let row = sqlx::query("SELECT counter_applied FROM events WHERE event_id = $1")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(STORE, &e))?;

        row.map(|row| {
            row.try_get::<bool, _>("counter_applied")
                .map(|counter_applied| RecordStatus { counter_applied })
                .map_err(|e| store_error(STORE, &e))
        })
        .transpose()
    }

    async fn set_counter_applied(&self, event_id: EventId) -> Result<(), StoreError> {
        sqlx::query("UPDATE events SET counter_applied = TRUE WHERE event_id = $1")
            .bind(event_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(STORE, &e))?;
        Ok(())
    }

    async fn count_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE user_id = $1")
            .bind(user_id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error(STORE, &e))?;

        u64::try_from(count).map_err(|_| StoreError::corrupt(STORE, format!("negative count {count}")))
    }
}

impl HistoryStore for PostgresHistoryStore {
    fn insert(&self, record: HistoricalRecord) -> StoreFuture<'_, ()> {
        Box::pin(self.insert_record(record))
    }

    fn lookup(&self, event_id: EventId) -> StoreFuture<'_, Option<RecordStatus>> {
        Box::pin(self.lookup_record(event_id))
    }

    fn mark_counter_applied(&self, event_id: EventId) -> StoreFuture<'_, ()> {
        Box::pin(self.set_counter_applied(event_id))
    }

    fn count_for_user(&self, user_id: UserId) -> StoreFuture<'_, u64> {
        Box::pin(self.count_user(user_id))
    }
}
