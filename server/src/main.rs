//! Actionstream service binary.

use actionstream_runtime::metrics::MetricsServer;
use actionstream_server::{Application, Config, Resources};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal outside local development
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "actionstream=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let config = Arc::new(Config::from_env()?);
    info!(
        role = %config.role,
        brokers = %config.redpanda.brokers,
        topic = %config.redpanda.topic,
        "Configuration loaded"
    );

    let metrics_addr: std::net::SocketAddr = format!("{}:{}", config.server.host, config.server.metrics_port)
        .parse()
        .context("invalid metrics address")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;

    let resources = Resources::from_config(&config).await?;

    Application::new(config, resources, metrics.handle().cloned())
        .run()
        .await
}
