//! # Fare Negotiation Core
//!
//! Domain types and dependency traits for the fare negotiation engine.
//!
//! A passenger (buyer) offers a per-seat price below what the driver (seller)
//! advertised. The driver accepts, declines or counters; a seller policy may
//! accept automatically. Every accepted negotiation becomes exactly one seat
//! reservation, and pending negotiations lapse after a fixed window.
//!
//! This crate holds no I/O. It defines:
//!
//! - **Types**: negotiation records, status lifecycle, trips and reservations
//! - **Policy**: the pure auto-accept evaluator
//! - **Events**: notification payloads and the outbound sink
//! - **Store**: repository, resource ledger and policy store traits
//! - **Environment**: injected clock
//!
//! The orchestration lives in `fare-negotiation-runtime`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod analytics;
pub mod error;
pub mod events;
pub mod policy;
pub mod store;
pub mod types;

pub use analytics::{NegotiationSummary, SummaryScope};
pub use error::{ConflictReason, ErrorKind, NegotiationError, StoreError, ValidationError};
pub use events::{NegotiationEvent, Notification, NotificationSink};
pub use policy::{AcceptDecision, OfferTerms, SellerPolicy};
pub use store::{
    InsertOutcome, NegotiationStore, PolicyStore, ResourceLedger, StoreFuture, SupersedeOutcome,
};
pub use types::{
    ActorRole, BookingPlan, ConversionOutcome, Money, Negotiation, NegotiationId,
    NegotiationStatus, Page, Party, RejectionReason, Reservation, ReservationId, SeatDecrement,
    Transition, TransitionOutcome, TripId, TripSnapshot, TripStatus, UserId,
};

/// Environment module - Dependency injection traits
///
/// External dependencies are abstracted behind traits and injected into the
/// engine. Time is the one every operation needs: deadlines and expiry are
/// always evaluated against an injected [`Clock`](environment::Clock), never
/// against ambient wall time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
    }
}
