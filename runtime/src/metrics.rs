//! Prometheus metrics for the ingestion pipeline.
//!
//! Every stage records into the global `metrics` recorder:
//! - Ingress: accepted, rejected and failed appends
//! - Worker: applied, duplicate, retried and dead-lettered records
//! - Query: realtime and history lookups
//! - Circuit breaker state per protected dependency
//!
//! [`MetricsServer::start`] installs the Prometheus recorder; the HTTP layer
//! serves [`MetricsServer::render`] on `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use actionstream_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address it is meant to be served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new, not yet installed, metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the `/metrics` endpoint should bind to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Install the Prometheus recorder, then describe all metrics to it.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    ///
    /// A recorder that is already installed (e.g. by an earlier test) is not
    /// an error; [`render`](Self::render) then returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    register_metrics();
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Ingress
    describe_counter!(
        "actionstream_ingest_accepted_total",
        "Envelopes acknowledged by the stream log"
    );
    describe_counter!(
        "actionstream_ingest_rejected_total",
        "Requests rejected by validation, by field"
    );
    describe_counter!(
        "actionstream_ingest_unavailable_total",
        "Requests failed because the stream log did not acknowledge"
    );
    describe_histogram!(
        "actionstream_ingest_append_duration_seconds",
        "Time from validation to stream log acknowledgement"
    );

    // Worker
    describe_counter!(
        "actionstream_worker_applied_total",
        "Records applied to both sinks and committed"
    );
    describe_counter!(
        "actionstream_worker_duplicates_total",
        "Redelivered records that were already applied"
    );
    describe_counter!(
        "actionstream_worker_retries_total",
        "Attempts retried because a sink was unavailable"
    );
    describe_counter!(
        "actionstream_worker_dead_letters_total",
        "Records routed to the dead-letter sink"
    );
    describe_counter!(
        "actionstream_worker_commit_errors_total",
        "Offset commits that failed"
    );
    describe_histogram!(
        "actionstream_worker_apply_duration_seconds",
        "Time to apply one record to both sinks"
    );
    describe_gauge!(
        "actionstream_worker_state",
        "Worker state (0=idle, 1=fetching, 2=applying, 3=committing, 4=shutting down)"
    );

    // Query
    describe_counter!(
        "actionstream_query_total",
        "Queries served, by kind"
    );
    describe_counter!(
        "actionstream_query_unavailable_total",
        "Queries failed because the backing store did not answer"
    );
    describe_histogram!(
        "actionstream_query_duration_seconds",
        "Query latency, by kind"
    );

    // Circuit breakers
    describe_gauge!(
        "actionstream_circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=half-open, 2=open), by breaker"
    );
    describe_counter!(
        "actionstream_circuit_breaker_rejections_total",
        "Calls rejected while a circuit was open, by breaker"
    );
}

/// Ingress metrics recorder.
pub struct IngestMetrics;

impl IngestMetrics {
    /// Record an acknowledged append.
    pub fn record_accepted(duration: Duration) {
        counter!("actionstream_ingest_accepted_total").increment(1);
        histogram!("actionstream_ingest_append_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a validation rejection.
    pub fn record_rejected(field: &'static str) {
        counter!("actionstream_ingest_rejected_total", "field" => field).increment(1);
    }

    /// Record an append the stream log did not acknowledge.
    pub fn record_unavailable() {
        counter!("actionstream_ingest_unavailable_total").increment(1);
    }
}

/// Worker metrics recorder.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record a record applied to both sinks.
    pub fn record_applied(duration: Duration) {
        counter!("actionstream_worker_applied_total").increment(1);
        histogram!("actionstream_worker_apply_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a redelivered record that needed no writes.
    pub fn record_duplicate() {
        counter!("actionstream_worker_duplicates_total").increment(1);
    }

    /// Record a retried attempt.
    pub fn record_retry() {
        counter!("actionstream_worker_retries_total").increment(1);
    }

    /// Record a dead-lettered record.
    pub fn record_dead_letter() {
        counter!("actionstream_worker_dead_letters_total").increment(1);
    }

    /// Record a failed offset commit.
    pub fn record_commit_error() {
        counter!("actionstream_worker_commit_errors_total").increment(1);
    }

    /// Record the worker's current state.
    pub fn record_state(state: f64) {
        gauge!("actionstream_worker_state").set(state);
    }
}

/// Query metrics recorder.
pub struct QueryMetrics;

impl QueryMetrics {
    /// Record a served query.
    pub fn record_query(kind: &'static str, duration: Duration) {
        counter!("actionstream_query_total", "kind" => kind).increment(1);
        histogram!("actionstream_query_duration_seconds", "kind" => kind)
            .record(duration.as_secs_f64());
    }

    /// Record a query the store did not answer.
    pub fn record_unavailable(kind: &'static str) {
        counter!("actionstream_query_unavailable_total", "kind" => kind).increment(1);
    }
}

/// Circuit breaker metrics recorder.
pub struct CircuitBreakerMetrics;

impl CircuitBreakerMetrics {
    /// Record a breaker's state: 0 = Closed, 1 = `HalfOpen`, 2 = Open.
    pub fn record_state(breaker: &'static str, state: f64) {
        gauge!("actionstream_circuit_breaker_state", "breaker" => breaker).set(state);
    }

    /// Record a call rejected by an open breaker.
    pub fn record_rejection(breaker: &'static str) {
        counter!("actionstream_circuit_breaker_rejections_total", "breaker" => breaker)
            .increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn server_is_not_installed_until_started() {
        let server = MetricsServer::new("127.0.0.1:9090".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr().port(), 9090);
    }

    #[test]
    fn rendered_output_contains_pipeline_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        IngestMetrics::record_accepted(Duration::from_millis(3));
        WorkerMetrics::record_applied(Duration::from_millis(5));
        QueryMetrics::record_query("realtime", Duration::from_millis(1));

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("actionstream_ingest_accepted_total"));
            assert!(rendered.contains(
                "# HELP actionstream_ingest_accepted_total Envelopes acknowledged by the stream log"
            ));
            assert!(rendered.contains("actionstream_worker_applied_total"));
            assert!(rendered.contains("actionstream_query_total"));
        }
    }
}
