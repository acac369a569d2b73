//! Routers per deployable role.
//!
//! The ingestion API and the analytics API are separate routers so they can
//! be bound to separate listeners, as in the compose deployment. Each gets
//! the shared layer stack from [`with_common_layers`].

use crate::handlers::{health, ingest, metrics, stats};
use crate::middleware::correlation_id_layer;
use crate::state::{AnalyticsState, HealthState, IngestState};
use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// `POST /ingest`.
pub fn ingest_router(state: IngestState) -> Router {
    Router::new()
        .route("/ingest", post(ingest::ingest))
        .with_state(state)
}

/// `GET /stats/realtime` and `GET /stats/history`.
pub fn analytics_router(state: AnalyticsState) -> Router {
    Router::new()
        .route("/stats/realtime", get(stats::realtime))
        .route("/stats/history", get(stats::history))
        .with_state(state)
}

/// `GET /health` and `GET /ready`.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .with_state(state)
}

/// `GET /metrics`, served on its own listener.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics))
        .with_state(handle)
}

/// CORS policy for browser callers such as the dashboard.
///
/// `*` allows any origin. Otherwise only the listed origins are allowed;
/// entries that are not valid header values are skipped with a warning.
#[must_use]
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| tracing::warn!(origin, "Ignoring invalid CORS origin"))
                .ok()
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Correlation id, request tracing and CORS.
pub fn with_common_layers(router: Router, allowed_origins: &[String]) -> Router {
    router
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}
