//! Analytics endpoints.
//!
//! ```text
//! GET /stats/realtime?userId=1   200 {"userId": 1, "actions": 3}
//! GET /stats/history?userId=1    200 {"userId": 1, "total_actions": 3}
//! ```
//!
//! A user never seen reads as zero. The two endpoints read different stores,
//! so an outage of one returns `503` there while the other keeps answering.

use crate::error::AppError;
use crate::state::AnalyticsState;
use actionstream_runtime::{HistoryStats, RealtimeStats};
use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;

/// `?userId=` query string.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UserQuery {
    /// User to report on
    #[serde(rename = "userId")]
    pub user_id: i64,
}

/// Realtime action count from the counter store.
///
/// # Errors
///
/// `400` for a missing or non-positive `userId`, `503` if the counter store is down.
pub async fn realtime(
    State(state): State<AnalyticsState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<RealtimeStats>, AppError> {
    let Query(UserQuery { user_id }) = query?;
    Ok(Json(state.queries.realtime(user_id).await?))
}

/// Durable record count from the history store.
///
/// # Errors
///
/// `400` for a missing or non-positive `userId`, `503` if the history store is down.
pub async fn history(
    State(state): State<AnalyticsState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<HistoryStats>, AppError> {
    let Query(UserQuery { user_id }) = query?;
    Ok(Json(state.queries.history(user_id).await?))
}
