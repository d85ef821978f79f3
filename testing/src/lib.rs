//! # Fare Negotiation Testing
//!
//! Testing utilities for the fare negotiation engine.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - [`InMemoryMarketplace`]: one in-memory implementation of the
//!   negotiation store, resource ledger and policy store
//! - [`RecordingNotificationSink`]: captures enqueued notifications
//! - Fixtures and proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use fare_negotiation_testing::{fixtures, test_clock, InMemoryMarketplace};
//!
//! #[tokio::test]
//! async fn offer_flow() {
//!     let market = Arc::new(InMemoryMarketplace::new());
//!     let trip = market.add_trip(fixtures::scheduled_trip(UserId::new(), 20_000, 3));
//!     let engine = NegotiationEngine::builder(...)
//!         .clock(Arc::new(test_clock()))
//!         .build();
//!     // ...
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use fare_negotiation_core::environment::Clock;

mod marketplace;
mod notifications;

pub use marketplace::InMemoryMarketplace;
pub use notifications::RecordingNotificationSink;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use fare_negotiation_testing::mocks::FixedClock;
    /// use fare_negotiation_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the engine.
    ///
    /// # Example
    ///
    /// ```
    /// use fare_negotiation_testing::mocks::ManualClock;
    /// use fare_negotiation_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::hours(25));
    /// assert_eq!(clock.now() - start, Duration::hours(25));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move time forward
        #[allow(clippy::unwrap_used, clippy::missing_panics_doc)] // Test infrastructure
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to an absolute time
        #[allow(clippy::unwrap_used, clippy::missing_panics_doc)] // Test infrastructure
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)] // Test infrastructure
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// A manual clock starting at the same instant as [`test_clock`]
    #[must_use]
    pub fn manual_clock() -> ManualClock {
        ManualClock::new(test_epoch())
    }

    // The literal always parses
    #[allow(clippy::expect_used)]
    fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Test data builders
pub mod fixtures {
    use fare_negotiation_core::{Money, TripId, TripSnapshot, TripStatus, UserId};

    /// A scheduled, negotiable trip
    #[must_use]
    pub fn scheduled_trip(seller: UserId, price_per_seat: u64, seats: u32) -> TripSnapshot {
        TripSnapshot {
            id: TripId::new(),
            seller_id: seller,
            price_per_seat: Money::new(price_per_seat),
            available_seats: seats,
            status: TripStatus::Scheduled,
            negotiable: true,
        }
    }
}

/// Test helpers
pub mod helpers {
    /// Install a test-friendly tracing subscriber.
    ///
    /// Safe to call from every test; only the first call installs it.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fare_negotiation=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing strategies
pub mod properties {
    use fare_negotiation_core::Money;
    use proptest::prelude::*;

    /// `(proposed, original)` with `0 < proposed < original`
    pub fn discounted_prices() -> impl Strategy<Value = (Money, Money)> {
        (2u64..1_000_000)
            .prop_flat_map(|original| (1..original, Just(original)))
            .prop_map(|(proposed, original)| (Money::new(proposed), Money::new(original)))
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, manual_clock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = manual_clock();
        let handle = clock.clone();
        let start = clock.now();
        handle.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }
}
