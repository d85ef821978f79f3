//! Negotiation worker binary.
//!
//! Runs the expiry sweeper and notification drain against `PostgreSQL`
//! until Ctrl+C or SIGTERM.

use fare_negotiation_core::environment::SystemClock;
use fare_negotiation_postgres::PostgresMarketplace;
use fare_negotiation_runtime::metrics::MetricsServer;
use fare_negotiation_runtime::{
    ChannelNotificationSink, EngineEnvironment, ExpirySweeper, NegotiationEngine,
};
use fare_negotiation_worker::{Config, WorkerError, spawn_notification_drain};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.observability.log_level)
                .unwrap_or_else(|_| EnvFilter::new("fare_negotiation=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fare negotiation worker");

    let engine_config = config.engine_config()?;
    info!(
        offer_window_hours = config.negotiation.offer_window_hours,
        counter_window_hours = config.negotiation.counter_window_hours,
        sweep_interval_secs = config.negotiation.sweep_interval_secs,
        sweep_batch_size = config.negotiation.sweep_batch_size,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.observability.metrics_addr);
    metrics.start()?;

    info!("Connecting to database...");
    let pool = config
        .postgres
        .pool_options()
        .connect(&config.postgres.url)
        .await?;
    let marketplace = Arc::new(PostgresMarketplace::new(pool));
    if config.postgres.run_migrations {
        marketplace.migrate().await?;
    }
    info!("Database ready");

    let (sink, notifications) =
        ChannelNotificationSink::channel(config.negotiation.notification_buffer);
    let drain = spawn_notification_drain(notifications);

    let engine = Arc::new(NegotiationEngine::new(
        EngineEnvironment::from_backend(marketplace, Arc::new(sink), Arc::new(SystemClock)),
        engine_config,
    ));

    let (stop, stopped) = watch::channel(false);
    let sweeper = ExpirySweeper::new(engine.clone()).spawn(stopped);

    shutdown_signal().await;

    if stop.send(true).is_err() {
        error!("Expiry sweeper exited before shutdown");
    }
    sweeper.await?;

    // Dropping the last engine handle closes the notification queue
    drop(engine);
    let delivered = drain.await?;

    info!(delivered, "Worker stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
