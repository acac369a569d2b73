//! Ingress gateway: validate a request and append it to the stream log.
//!
//! "Accepted" means "durably logged", not "applied". The gateway never talks
//! to the sinks; the acknowledgement is returned as soon as the stream log
//! confirms the append.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::metrics::IngestMetrics;
use actionstream_core::{
    AppendReceipt, Envelope, EventId, IngestError, IngestRequest, StreamLog, StreamLogError,
    ValidationError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ingress gateway configuration.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Upper bound on one stream log append
    pub append_timeout: Duration,
    /// Breaker guarding the stream log
    pub breaker: CircuitBreakerConfig,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            append_timeout: Duration::from_secs(5),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Acknowledgement returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestAck {
    /// Identifier assigned (or accepted) for the envelope
    pub event_id: EventId,
    /// Partition the envelope was appended to
    pub partition: i32,
    /// Offset within that partition
    pub offset: i64,
}

/// Validates requests and appends them to the stream log.
///
/// Cheap to clone; clones share the stream log handle and circuit breaker.
#[derive(Clone)]
pub struct IngressGateway {
    log: Arc<dyn StreamLog>,
    breaker: CircuitBreaker,
    append_timeout: Duration,
}

impl IngressGateway {
    /// Create a gateway appending to `log`.
    #[must_use]
    pub fn new(log: Arc<dyn StreamLog>, config: IngressConfig) -> Self {
        Self {
            log,
            breaker: CircuitBreaker::new("stream_log", config.breaker),
            append_timeout: config.append_timeout,
        }
    }

    /// Validate `request` and append it under its user's partition key.
    ///
    /// # Errors
    ///
    /// - [`IngestError::Validation`] if the request breaks an envelope invariant;
    ///   nothing is appended
    /// - [`IngestError::DependencyUnavailable`] if the append failed, timed out,
    ///   or the stream log circuit is open; the caller may retry
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestAck, IngestError> {
        let envelope = Envelope::validate(request).inspect_err(|e| {
            IngestMetrics::record_rejected(e.field());
            tracing::debug!(error = %e, "Rejected ingest request");
        })?;

        let payload = envelope
            .to_bytes()
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let started = Instant::now();
        let receipt = self
            .append(envelope.partition_key(), payload)
            .await
            .map_err(|reason| {
                IngestMetrics::record_unavailable();
                tracing::warn!(
                    event_id = %envelope.event_id(),
                    user_id = %envelope.user_id(),
                    error = %reason,
                    "Stream log append failed"
                );
                IngestError::DependencyUnavailable(reason)
            })?;
        IngestMetrics::record_accepted(started.elapsed());

        tracing::debug!(
            event_id = %envelope.event_id(),
            user_id = %envelope.user_id(),
            partition = receipt.partition,
            offset = receipt.offset,
            "Envelope accepted"
        );

        Ok(IngestAck {
            event_id: envelope.event_id().clone(),
            partition: receipt.partition,
            offset: receipt.offset,
        })
    }

    async fn append(&self, key: String, payload: Vec<u8>) -> Result<AppendReceipt, String> {
        let timeout = self.append_timeout;
        let log = Arc::clone(&self.log);

        let result = self
            .breaker
            .call(|| async move {
                tokio::time::timeout(timeout, log.append(key, payload))
                    .await
                    .unwrap_or_else(|_| {
                        Err(StreamLogError::AppendFailed(format!(
                            "timed out after {}ms",
                            timeout.as_millis()
                        )))
                    })
            })
            .await;

        result.map_err(|e| match e {
            CircuitBreakerError::Open(name) => format!("circuit '{name}' is open"),
            CircuitBreakerError::Inner(inner) => inner.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use actionstream_testing::{InMemoryStreamLog, fixtures};

    fn gateway(log: &InMemoryStreamLog) -> IngressGateway {
        IngressGateway::new(
            Arc::new(log.clone()),
            IngressConfig {
                append_timeout: Duration::from_millis(200),
                breaker: CircuitBreakerConfig::builder().failure_threshold(2).build(),
            },
        )
    }

    #[tokio::test]
    async fn valid_request_is_appended_under_user_partition() {
        let log = InMemoryStreamLog::new(4);
        let ack = gateway(&log)
            .ingest(fixtures::request(1, "click"))
            .await
            .unwrap();

        assert_eq!(ack.partition, log.partition_for("1"));
        assert_eq!(ack.offset, 0);
        let payloads = log.payloads(ack.partition);
        let stored = Envelope::from_bytes(&payloads[0]).unwrap();
        assert_eq!(stored.event_id(), &ack.event_id);
        assert_eq!(stored.action(), "click");
    }

    #[tokio::test]
    async fn caller_event_id_is_kept() {
        let log = InMemoryStreamLog::new(1);
        let ack = gateway(&log)
            .ingest(fixtures::request(1, "click").with_event_id("client-7"))
            .await
            .unwrap();
        assert_eq!(ack.event_id.as_str(), "client-7");
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_log() {
        let log = InMemoryStreamLog::new(2);
        let gateway = gateway(&log);

        let negative = gateway
            .ingest(IngestRequest::new(-1, "click", fixtures::TEST_TIMESTAMP))
            .await;
        let empty = gateway
            .ingest(IngestRequest::new(5, "", fixtures::TEST_TIMESTAMP))
            .await;

        assert_eq!(
            negative.unwrap_err(),
            IngestError::Validation(ValidationError::InvalidUserId(-1))
        );
        assert_eq!(
            empty.unwrap_err(),
            IngestError::Validation(ValidationError::EmptyAction)
        );
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn append_failure_is_dependency_unavailable() {
        let log = InMemoryStreamLog::new(1);
        log.fail_next_appends(1);

        let err = gateway(&log)
            .ingest(fixtures::request(1, "click"))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::DependencyUnavailable(_)));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_appending() {
        let log = InMemoryStreamLog::new(1);
        let gateway = gateway(&log);
        log.set_down(true);
        for _ in 0..2 {
            let _ = gateway.ingest(fixtures::request(1, "click")).await;
        }

        log.set_down(false);
        let err = gateway
            .ingest(fixtures::request(1, "click"))
            .await
            .unwrap_err();

        match err {
            IngestError::DependencyUnavailable(reason) => assert!(reason.contains("open")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(log.is_empty());
    }
}
