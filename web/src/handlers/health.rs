//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestrators.
//!
//! - `GET /health`: liveness. Always `200` while the process serves HTTP;
//!   does not touch any dependency.
//! - `GET /ready`: readiness. Runs every configured dependency check and
//!   answers `200` when none is unhealthy, `503` otherwise, with the full
//!   report as the body.

use crate::state::HealthState;
use actionstream_runtime::{HealthReport, run_checks};
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Liveness body.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `"ok"`
    pub status: &'static str,
    /// Which service answered
    pub service: &'static str,
}

/// Liveness check.
#[allow(clippy::unused_async)]
pub async fn health_check(State(state): State<HealthState>) -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        service: state.service,
    })
}

/// Readiness check.
///
/// A degraded dependency still answers `200`: the service can do its job,
/// the report just says something needs attention.
pub async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = run_checks(&state.checks, state.check_timeout).await;

    let status = if report.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(report))
}
