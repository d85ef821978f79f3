//! Expiry Sweeper: the periodic background task that expires lapsed offers.
//!
//! Each tick runs [`NegotiationEngine::sweep_expired`]. Because expiry uses
//! the same conditional transition as live responses, the sweeper can run
//! alongside request handling without coordination.

use crate::engine::NegotiationEngine;
use crate::metrics::NegotiationMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically expires lapsed negotiations.
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    engine: Arc<NegotiationEngine>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper ticking at the engine's configured `sweep_interval`.
    #[must_use]
    pub fn new(engine: Arc<NegotiationEngine>) -> Self {
        let interval = engine.config().sweep_interval;
        Self { engine, interval }
    }

    /// Override the tick interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one pass, logging instead of propagating failures.
    ///
    /// Returns the number of records expired by this pass.
    pub async fn tick(&self) -> u64 {
        let start = Instant::now();
        let expired = match self.engine.sweep_expired().await {
            Ok(count) => count,
            Err(e) => {
                NegotiationMetrics::record_sweep_failure();
                tracing::error!(error = %e, "Expiry sweep failed, retrying next tick");
                0
            }
        };
        NegotiationMetrics::record_sweep(start.elapsed());
        expired
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    /// Spawn [`Self::run`] on the current Tokio runtime.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{EngineEnvironment, OfferRequest};
    use chrono::Duration as ChronoDuration;
    use fare_negotiation_core::{Money, NegotiationStatus, UserId};
    use fare_negotiation_testing::{
        InMemoryMarketplace, RecordingNotificationSink, fixtures, manual_clock,
    };

    #[tokio::test]
    async fn spawned_sweeper_expires_and_stops_on_shutdown() {
        let market = Arc::new(InMemoryMarketplace::new());
        let clock = manual_clock();
        let trip = market.add_trip(fixtures::scheduled_trip(UserId::new(), 20_000, 3));
        let engine = Arc::new(NegotiationEngine::new(
            EngineEnvironment::from_backend(
                market.clone(),
                Arc::new(RecordingNotificationSink::new()),
                Arc::new(clock.clone()),
            ),
            EngineConfig::default(),
        ));

        let offer = engine
            .create_offer(OfferRequest {
                trip_id: trip,
                buyer_id: UserId::new(),
                proposed_price: Money::new(16_000),
                seats_requested: 1,
                message: None,
            })
            .await
            .unwrap();
        clock.advance(ChronoDuration::hours(25));

        let (stop, stopped) = watch::channel(false);
        let handle = ExpirySweeper::new(engine)
            .with_interval(Duration::from_millis(10))
            .spawn(stopped);

        // The first tick fires immediately
        for _ in 0..50 {
            if market.negotiation(offer.id).unwrap().status == NegotiationStatus::Expired {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            market.negotiation(offer.id).unwrap().status,
            NegotiationStatus::Expired
        );

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn tick_swallows_store_failures() {
        let market = Arc::new(InMemoryMarketplace::new());
        let engine = Arc::new(NegotiationEngine::new(
            EngineEnvironment::from_backend(
                market.clone(),
                Arc::new(RecordingNotificationSink::new()),
                Arc::new(manual_clock()),
            ),
            EngineConfig::default(),
        ));
        market.set_unavailable(true);

        assert_eq!(ExpirySweeper::new(engine).tick().await, 0);
    }
}
