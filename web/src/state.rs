//! Shared state for each router.
//!
//! Handlers receive only the component they use, so the ingestion listener
//! never holds store handles and the analytics listener never holds the
//! stream log producer.

use actionstream_runtime::{DependencyCheck, IngressGateway, QueryService};
use std::sync::Arc;
use std::time::Duration;

/// State for the ingestion router.
#[derive(Clone)]
pub struct IngestState {
    /// Gateway appending to the stream log
    pub gateway: IngressGateway,
}

/// State for the analytics router.
#[derive(Clone)]
pub struct AnalyticsState {
    /// Realtime and history reads
    pub queries: QueryService,
}

/// State for `/health` and `/ready`.
#[derive(Clone)]
pub struct HealthState {
    /// Service name reported by `/health`
    pub service: &'static str,
    /// Dependencies checked by `/ready`
    pub checks: Arc<Vec<Arc<dyn DependencyCheck>>>,
    /// Upper bound per check
    pub check_timeout: Duration,
}

impl HealthState {
    /// Health state with no dependency checks.
    #[must_use]
    pub fn new(service: &'static str) -> Self {
        Self {
            service,
            checks: Arc::new(Vec::new()),
            check_timeout: Duration::from_secs(2),
        }
    }

    /// Replace the dependency checks.
    #[must_use]
    pub fn with_checks(mut self, checks: Vec<Arc<dyn DependencyCheck>>) -> Self {
        self.checks = Arc::new(checks);
        self
    }

    /// Set the per-check timeout.
    #[must_use]
    pub const fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }
}
