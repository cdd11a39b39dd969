//! Inventory command processor.
//!
//! Consumes inventory domain events, applies them to the record store, and
//! publishes one correlated response per event.

use inventory_cmd_runtime::metrics::MetricsServer;
use inventory_cmd_service::{Application, Config, Resources};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting inventory command processor");
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        command_topic = %config.redpanda.command_topic,
        response_topic = %config.redpanda.response_topic,
        aggregate_id = config.redpanda.aggregate_id,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start()?;

    let resources = Resources::connect(&config).await?;
    Application::new(&config, resources)
        .run_until(shutdown_signal())
        .await;

    info!("Inventory command processor stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
