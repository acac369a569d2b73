//! Application lifecycle management and graceful shutdown.
//!
//! [`Application::run`] starts whatever the configured role needs:
//!
//! 1. **Workers**: `WORKER_COUNT` processing workers sharing one consumer group
//! 2. **Ingestion API** on `INGEST_PORT`
//! 3. **Analytics API** on `ANALYTICS_PORT`
//! 4. **Metrics and health** on `METRICS_PORT` (always)
//!
//! # Graceful Shutdown
//!
//! On Ctrl+C or SIGTERM:
//! 1. Listeners stop accepting connections and drain in-flight requests
//! 2. Workers finish the record they are applying; anything not yet
//!    committed is redelivered to the next consumer
//! 3. The process exits once everything stopped or `SHUTDOWN_TIMEOUT` elapsed

use crate::bootstrap::{CounterCheck, HistoryCheck, Resources, StreamLogCheck};
use crate::config::Config;
use actionstream_core::StreamLog;
use actionstream_runtime::{
    DependencyCheck, IngressConfig, IngressGateway, ProcessingWorker, QueryConfig, QueryService,
    RetryPolicy, WorkerCheck, WorkerConfig, WorkerHandle, WorkerSinks,
};
use actionstream_web::{AnalyticsState, HealthState, IngestState, router};
use anyhow::Context;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

/// Running application with all background tasks.
pub struct Application {
    config: Arc<Config>,
    resources: Resources,
    metrics: Option<PrometheusHandle>,
}

struct Workers {
    handles: Vec<WorkerHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl Application {
    /// Create a new application instance.
    ///
    /// `metrics` is served on `/metrics` when present.
    #[must_use]
    pub const fn new(
        config: Arc<Config>,
        resources: Resources,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config,
            resources,
            metrics,
        }
    }

    /// Run the application until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns error if a listener cannot be bound, or if the role needs
    /// stores that were not opened.
    pub async fn run(self) -> anyhow::Result<()> {
        let role = self.config.role;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let mut checks = self.dependency_checks();
        let workers = self.spawn_workers(&mut checks)?;

        let health = HealthState::new(role.as_str())
            .with_checks(checks)
            .with_check_timeout(self.config.readiness_timeout());

        let mut servers = Vec::new();
        if role.serves_ingest() {
            let gateway = IngressGateway::new(self.stream_log(), IngressConfig::default());
            let app = router::ingest_router(IngestState { gateway })
                .merge(router::health_router(health.clone()));
            servers.push(
                self.serve("ingest", self.config.server.ingest_port, app, &shutdown_tx)
                    .await?,
            );
        }

        if role.serves_analytics() {
            let stores = self.resources.stores()?;
            let queries = QueryService::new(
                stores.counter.clone(),
                stores.history.clone(),
                QueryConfig::default(),
            );
            let app = router::analytics_router(AnalyticsState { queries })
                .merge(router::health_router(health.clone()));
            servers.push(
                self.serve("analytics", self.config.server.analytics_port, app, &shutdown_tx)
                    .await?,
            );
        }

        let mut ops = router::health_router(health);
        if let Some(handle) = self.metrics.clone() {
            ops = ops.merge(router::metrics_router(handle));
        } else {
            warn!("Metrics recorder not installed by this process, /metrics disabled");
        }
        servers.push(
            self.serve("metrics", self.config.server.metrics_port, ops, &shutdown_tx)
                .await?,
        );

        info!(%role, listeners = servers.len(), workers = workers.handles.len(), "Actionstream running");

        shutdown_signal().await;
        info!("Initiating graceful shutdown...");

        let _ = shutdown_tx.send(());
        for handle in &workers.handles {
            handle.shutdown();
        }

        let timeout = self.config.shutdown_timeout();
        let drain = async {
            for server in servers {
                if let Err(e) = server.await {
                    warn!(error = %e, "HTTP server task failed");
                }
            }
            for task in workers.tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Worker task failed");
                }
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Shutdown timed out; uncommitted records will be redelivered"
            );
        } else {
            info!("Graceful shutdown complete");
        }
        Ok(())
    }

    fn stream_log(&self) -> Arc<dyn StreamLog> {
        self.resources.stream_log.clone()
    }

    fn dependency_checks(&self) -> Vec<Arc<dyn DependencyCheck>> {
        let mut checks: Vec<Arc<dyn DependencyCheck>> = vec![Arc::new(StreamLogCheck::new(
            self.resources.stream_log.clone(),
            self.config.readiness_timeout(),
        ))];
        if let Some(stores) = &self.resources.stores {
            checks.push(Arc::new(HistoryCheck::new(
                stores.history.clone(),
                stores.dead_letters.clone(),
            )));
            checks.push(Arc::new(CounterCheck::new(stores.counter.clone())));
        }
        checks
    }

    fn spawn_workers(&self, checks: &mut Vec<Arc<dyn DependencyCheck>>) -> anyhow::Result<Workers> {
        let mut workers = Workers {
            handles: Vec::new(),
            tasks: Vec::new(),
        };
        if !self.config.role.runs_workers() {
            return Ok(workers);
        }

        let stores = self.resources.stores()?;
        let sinks = WorkerSinks {
            history: stores.history.clone(),
            counter: stores.counter.clone(),
            dead_letters: stores.dead_letters.clone(),
        };
        let worker_config = WorkerConfig {
            retry: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(self.config.worker.retry_initial_ms))
                .max_delay(Duration::from_millis(self.config.worker.retry_max_ms))
                .jitter(true)
                .build(),
        };

        info!(count = self.config.worker.count, group = %self.config.redpanda.consumer_group, "Starting processing workers");
        for id in 0..self.config.worker.count {
            let (worker, handle) =
                ProcessingWorker::new(self.stream_log(), sinks.clone(), worker_config.clone());
            let name = format!("worker-{id}");
            checks.push(Arc::new(WorkerCheck::new(name.clone(), handle.clone())));
            workers.handles.push(handle);

            let task = async move {
                let stats = worker.run().await;
                info!(
                    applied = stats.applied,
                    duplicates = stats.duplicates,
                    dead_lettered = stats.dead_lettered,
                    "Worker stopped"
                );
            };
            workers
                .tasks
                .push(tokio::spawn(task.instrument(info_span!("worker", name = %name))));
        }
        Ok(workers)
    }

    async fn serve(
        &self,
        name: &'static str,
        port: u16,
        app: Router,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let addr = format!("{}:{}", self.config.server.host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {name} listener on {addr}"))?;
        info!(listener = name, address = %addr, "Server listening");

        let app = router::with_common_layers(app, &self.config.server.cors_origins);
        let mut shutdown_rx = shutdown_tx.subscribe();
        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            match result {
                Ok(()) => info!(listener = name, "Server stopped"),
                Err(e) => error!(listener = name, error = %e, "Server failed"),
            }
        }))
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
