//! Prometheus metrics for the negotiation engine.
//!
//! This module provides metric collection for:
//! - Offer creation and auto-acceptance
//! - State transitions
//! - Booking conversions
//! - Expiry sweeps
//! - Notification delivery
//!
//! # Example
//!
//! ```rust,no_run
//! use fare_negotiation_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use fare_negotiation_core::NegotiationStatus;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

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

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or the recorder installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        let addr = self.addr;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!(%addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "negotiation_offers_created_total",
        "Total number of buyer offers stored"
    );
    describe_counter!(
        "negotiation_offers_auto_accepted_total",
        "Total number of offers accepted by seller policy"
    );
    describe_counter!(
        "negotiation_transitions_total",
        "Total number of terminal transitions, by resulting status"
    );
    describe_counter!(
        "negotiation_conversions_total",
        "Total number of accept-and-book attempts, by outcome"
    );
    describe_counter!(
        "negotiation_expired_total",
        "Total number of negotiations moved to expired"
    );
    describe_counter!(
        "negotiation_sweep_failures_total",
        "Total number of records the sweeper failed to transition"
    );
    describe_counter!(
        "negotiation_notifications_dropped_total",
        "Total number of notifications dropped because the queue was full or closed"
    );
    describe_histogram!(
        "negotiation_sweep_duration_seconds",
        "Time taken by one expiry sweep pass"
    );
}

/// Negotiation metrics recorder.
pub struct NegotiationMetrics;

impl NegotiationMetrics {
    /// Record a stored offer.
    pub fn record_offer_created() {
        counter!("negotiation_offers_created_total").increment(1);
    }

    /// Record an offer accepted by seller policy.
    pub fn record_auto_accept() {
        counter!("negotiation_offers_auto_accepted_total").increment(1);
    }

    /// Record a terminal transition.
    pub fn record_transition(status: NegotiationStatus) {
        counter!("negotiation_transitions_total", "status" => status.as_str()).increment(1);
        if status == NegotiationStatus::Expired {
            counter!("negotiation_expired_total").increment(1);
        }
    }

    /// Record an accept-and-book outcome (`converted`, `insufficient_seats`, `trip_not_scheduled`, `already_terminal`).
    pub fn record_conversion(outcome: &'static str) {
        counter!("negotiation_conversions_total", "outcome" => outcome).increment(1);
    }

    /// Record a completed sweep pass.
    pub fn record_sweep(duration: Duration) {
        histogram!("negotiation_sweep_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a record the sweeper could not transition.
    pub fn record_sweep_failure() {
        counter!("negotiation_sweep_failures_total").increment(1);
    }

    /// Record a dropped notification.
    pub fn record_notification_dropped(reason: &'static str) {
        counter!("negotiation_notifications_dropped_total", "reason" => reason).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        NegotiationMetrics::record_offer_created();
        NegotiationMetrics::record_transition(NegotiationStatus::Expired);
        NegotiationMetrics::record_conversion("converted");
        NegotiationMetrics::record_sweep(Duration::from_millis(5));
    }
}
