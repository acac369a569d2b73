//! Health reporting for readiness checks.
//!
//! Each external dependency (and each processing worker) is wrapped in a
//! [`DependencyCheck`]. [`run_checks`] runs them concurrently, each under its
//! own timeout, and folds the results into one [`HealthReport`] whose status
//! is the worst of its checks.

use crate::worker::{WorkerHandle, WorkerState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Health status of a component or of the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Operational, but something needs attention
    Degraded,
    /// Not operational
    Unhealthy,
}

impl HealthStatus {
    /// Whether the status is [`HealthStatus::Healthy`].
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Whether the status is [`HealthStatus::Unhealthy`].
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// The worse of two statuses.
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of checking one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Component name ("stream_log", "history", "counter", "worker-0", ...)
    pub component: String,
    /// Status
    pub status: HealthStatus,
    /// Details when not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra key/value details
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl HealthCheck {
    /// Healthy result.
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Degraded result.
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            ..Self::healthy(component)
        }
    }

    /// Unhealthy result.
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            ..Self::healthy(component)
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Aggregated health of the service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among the checks
    pub status: HealthStatus,
    /// Individual checks
    pub checks: Vec<HealthCheck>,
    /// When the report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Fold `checks` into a report. No checks means healthy.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// A dependency the readiness endpoint can check.
pub trait DependencyCheck: Send + Sync {
    /// Component name used in the report.
    fn component(&self) -> String;

    /// Check the component.
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>>;
}

/// Run every check concurrently, each bounded by `timeout`.
pub async fn run_checks(checks: &[Arc<dyn DependencyCheck>], timeout: Duration) -> HealthReport {
    let results = futures::future::join_all(checks.iter().map(|check| async move {
        tokio::time::timeout(timeout, check.check())
            .await
            .unwrap_or_else(|_| {
                HealthCheck::unhealthy(
                    check.component(),
                    format!("no answer within {}ms", timeout.as_millis()),
                )
            })
    }))
    .await;

    let report = HealthReport::new(results);
    if !report.status.is_healthy() {
        tracing::warn!(status = %report.status, "Readiness check not healthy");
    }
    report
}

/// Reports a processing worker's state and counters.
///
/// A stopped worker is unhealthy. A worker that has dead-lettered records
/// is degraded: it keeps running, but an operator should look at the
/// dead-letter queue.
pub struct WorkerCheck {
    name: String,
    handle: WorkerHandle,
}

impl WorkerCheck {
    /// Check for the worker behind `handle`.
    #[must_use]
    pub fn new(name: impl Into<String>, handle: WorkerHandle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }
}

impl DependencyCheck for WorkerCheck {
    fn component(&self) -> String {
        self.name.clone()
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>> {
        Box::pin(async move {
            let state = self.handle.state();
            let stats = self.handle.stats();

            let check = if state == WorkerState::ShuttingDown {
                HealthCheck::unhealthy(&self.name, "worker stopped")
            } else if stats.dead_lettered > 0 {
                HealthCheck::degraded(
                    &self.name,
                    format!("{} records dead-lettered", stats.dead_lettered),
                )
            } else {
                HealthCheck::healthy(&self.name)
            };

            check
                .with_metadata("state", state.as_str())
                .with_metadata("applied", stats.applied)
                .with_metadata("duplicates", stats.duplicates)
                .with_metadata("dead_lettered", stats.dead_lettered)
                .with_metadata("retries", stats.retries)
        })
    }
}
