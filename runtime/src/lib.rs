//! # Actionstream Runtime
//!
//! The three pipeline components, plus the resilience and observability
//! helpers they share.
//!
//! ## Core Components
//!
//! - **Ingress Gateway**: validates requests and appends envelopes to the stream log
//! - **Processing Worker**: consumes the log and applies each envelope to the
//!   history store and the counter store, committing only after both writes
//! - **Query Service**: realtime and historical reads, each with its own timeout
//!
//! Every component depends only on the traits in `actionstream-core`, so the
//! same code runs against Redpanda/Postgres/Redis in production and against
//! the in-memory doubles of `actionstream-testing` in tests.
//!
//! ## Example
//!
//! ```ignore
//! use actionstream_runtime::{IngressGateway, IngressConfig, ProcessingWorker, WorkerConfig, WorkerSinks};
//!
//! let gateway = IngressGateway::new(log.clone(), IngressConfig::default());
//! let ack = gateway.ingest(request).await?;
//!
//! let (worker, handle) = ProcessingWorker::new(log, sinks, WorkerConfig::default());
//! tokio::spawn(worker.run());
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Circuit breaker guarding the stream log
pub mod circuit_breaker;

/// Prometheus metrics for observability
pub mod metrics;

/// Ingress gateway
pub mod ingress;

/// Processing worker and its state machine
pub mod worker;

/// Query service
pub mod query;

/// Readiness reporting
pub mod health;

// Re-export commonly used types
pub use health::{DependencyCheck, HealthCheck, HealthReport, HealthStatus, WorkerCheck, run_checks};
pub use ingress::{IngestAck, IngressConfig, IngressGateway};
pub use query::{HistoryStats, QueryConfig, QueryService, RealtimeStats};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use worker::{
    ProcessingWorker, WorkerConfig, WorkerHandle, WorkerSinks, WorkerState, WorkerStats,
};
