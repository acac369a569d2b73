//! Read side: realtime counts from the counter store, historical counts from
//! the history store.
//!
//! The two reads are independent. Each has its own timeout, so a slow
//! history store never delays a realtime answer and vice versa.

use crate::metrics::QueryMetrics;
use actionstream_core::{CounterStore, HistoryStore, QueryError, StoreError, UserId};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-store read timeouts.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Timeout for counter store reads
    pub realtime_timeout: Duration,
    /// Timeout for history store reads
    pub history_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            realtime_timeout: Duration::from_secs(1),
            history_timeout: Duration::from_secs(5),
        }
    }
}

/// Answer to a realtime query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    /// Queried user
    pub user_id: i64,
    /// Actions counted so far
    pub actions: u64,
}

/// Answer to a history query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    /// Queried user
    #[serde(rename = "userId")]
    pub user_id: i64,
    /// Durable records held for the user
    pub total_actions: u64,
}

/// Read-only query service over both stores.
#[derive(Clone)]
pub struct QueryService {
    counter: Arc<dyn CounterStore>,
    history: Arc<dyn HistoryStore>,
    config: QueryConfig,
}

impl QueryService {
    /// Create a query service.
    #[must_use]
    pub fn new(
        counter: Arc<dyn CounterStore>,
        history: Arc<dyn HistoryStore>,
        config: QueryConfig,
    ) -> Self {
        Self {
            counter,
            history,
            config,
        }
    }

    /// Realtime action count for `user_id`; zero for a user never seen.
    ///
    /// # Errors
    ///
    /// - [`QueryError::InvalidUserId`] if `user_id <= 0`
    /// - [`QueryError::DependencyUnavailable`] if the counter store fails or times out
    pub async fn realtime(&self, user_id: i64) -> Result<RealtimeStats, QueryError> {
        let user = parse_user(user_id)?;
        let actions = timed(
            "realtime",
            "counter",
            self.config.realtime_timeout,
            self.counter.get(user),
        )
        .await?;
        Ok(RealtimeStats { user_id, actions })
    }

    /// Number of durable records held for `user_id`; zero for a user never seen.
    ///
    /// # Errors
    ///
    /// - [`QueryError::InvalidUserId`] if `user_id <= 0`
    /// - [`QueryError::DependencyUnavailable`] if the history store fails or times out
    pub async fn history(&self, user_id: i64) -> Result<HistoryStats, QueryError> {
        let user = parse_user(user_id)?;
        let total_actions = timed(
            "history",
            "history",
            self.config.history_timeout,
            self.history.count_for_user(user),
        )
        .await?;
        Ok(HistoryStats {
            user_id,
            total_actions,
        })
    }
}

fn parse_user(user_id: i64) -> Result<UserId, QueryError> {
    UserId::new(user_id).map_err(|_| QueryError::InvalidUserId(user_id))
}

async fn timed<F>(
    kind: &'static str,
    store: &'static str,
    timeout: Duration,
    read: F,
) -> Result<u64, QueryError>
where
    F: Future<Output = Result<u64, StoreError>>,
{
    let started = Instant::now();
    let reason = match tokio::time::timeout(timeout, read).await {
        Ok(Ok(value)) => {
            QueryMetrics::record_query(kind, started.elapsed());
            return Ok(value);
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("timed out after {}ms", timeout.as_millis()),
    };

    QueryMetrics::record_unavailable(kind);
    tracing::warn!(query = kind, store, error = %reason, "Query failed");
    Err(QueryError::DependencyUnavailable { store, reason })
}
