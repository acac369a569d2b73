//! Axum HTTP surface for Actionstream.
//!
//! A thin shell over `actionstream-runtime`: handlers parse the request,
//! call the ingress gateway or the query service, and map the result to a
//! response. No pipeline logic lives here.
//!
//! # Endpoints
//!
//! | Route                        | Router                         |
//! |------------------------------|--------------------------------|
//! | `POST /ingest`               | [`router::ingest_router`]      |
//! | `GET /stats/realtime`        | [`router::analytics_router`]   |
//! | `GET /stats/history`         | [`router::analytics_router`]   |
//! | `GET /health`, `GET /ready`  | [`router::health_router`]      |
//! | `GET /metrics`               | [`router::metrics_router`]     |
//!
//! # Example
//!
//! ```ignore
//! use actionstream_web::{IngestState, HealthState, router};
//!
//! let app = router::ingest_router(IngestState { gateway })
//!     .merge(router::health_router(HealthState::new("ingest")));
//! let app = router::with_common_layers(app, &["*".to_string()]);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};
pub use state::{AnalyticsState, HealthState, IngestState};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
