//! # Fare Negotiation Worker
//!
//! Background process for the negotiation engine: loads configuration from
//! the environment, installs logging and Prometheus metrics, then runs the
//! [`ExpirySweeper`](fare_negotiation_runtime::ExpirySweeper) and the
//! notification drain until shut down.

pub mod config;
pub mod drain;

pub use config::Config;
pub use drain::spawn_notification_drain;

use thiserror::Error;

/// Startup and shutdown failures of the worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Engine settings are incoherent.
    #[error("Invalid configuration: {0}")]
    Config(#[from] fare_negotiation_runtime::ConfigError),

    /// Metrics exporter could not be installed.
    #[error(transparent)]
    Metrics(#[from] fare_negotiation_runtime::metrics::MetricsError),

    /// Database connection or migration failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<sqlx::Error> for WorkerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<fare_negotiation_core::StoreError> for WorkerError {
    fn from(e: fare_negotiation_core::StoreError) -> Self {
        Self::Database(e.to_string())
    }
}
