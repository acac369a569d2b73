//! Ingestion endpoint.
//!
//! ```text
//! POST /ingest
//! {"userId": 1, "action": "click", "timestamp": "2024-01-01T00:00:00Z"}
//!
//! 201 {"status": "accepted", "eventId": "6f0c..."}
//! ```
//!
//! `201` means the event is durably in the stream log, not that it has been
//! counted yet. A caller that retries after a `503` should resend the same
//! `eventId` so the retry cannot be counted twice.

use crate::error::AppError;
use crate::middleware::CorrelationId;
use crate::state::IngestState;
use actionstream_core::IngestRequest;
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Serialize;

/// Body of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Always `"accepted"`
    pub status: &'static str,
    /// Identifier assigned to (or supplied with) the event
    pub event_id: String,
}

/// Validate the request and append it to the stream log.
///
/// # Errors
///
/// - `400 BAD_REQUEST` if the body is not a JSON ingest request
/// - `400 VALIDATION_ERROR` if a field is invalid
/// - `503 SERVICE_UNAVAILABLE` if the stream log did not acknowledge
pub async fn ingest(
    State(state): State<IngestState>,
    correlation_id: Option<Extension<CorrelationId>>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let Json(request) = payload?;
    let user_id = request.user_id;

    let ack = state.gateway.ingest(request).await?;

    tracing::info!(
        correlation_id = correlation_id.as_ref().map(|Extension(id)| tracing::field::display(id)),
        event_id = %ack.event_id,
        user_id,
        partition = ack.partition,
        offset = ack.offset,
        "Event ingested"
    );

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            status: "accepted",
            event_id: ack.event_id.into_inner(),
        }),
    ))
}
