//! Storage abstractions the engine depends on.
//!
//! # Design
//!
//! - [`NegotiationStore`]: durable negotiation records. Every change of
//!   `status` goes through a compare-and-swap keyed on the expected prior
//!   status; the composite operations (`supersede_with_counter`,
//!   `accept_and_book`) are single atomic units.
//! - [`ResourceLedger`]: the external trip inventory. Reads price and seats,
//!   and decrements seats only through decrement-if-sufficient.
//! - [`PolicyStore`]: per-seller auto-accept configuration.
//!
//! # Implementations
//!
//! - `PostgresMarketplace` (in `fare-negotiation-postgres`): Production implementation
//! - `InMemoryMarketplace` (in `fare-negotiation-testing`): Fast, deterministic testing
//!
//! # Dyn Compatibility
//!
//! These traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! the engine can hold them as `Arc<dyn NegotiationStore>`.

use crate::analytics::{NegotiationSummary, SummaryScope};
use crate::error::StoreError;
use crate::policy::SellerPolicy;
use crate::types::{
    ActorRole, BookingPlan, ConversionOutcome, Negotiation, NegotiationId, NegotiationStatus,
    Page, SeatDecrement, Transition, TransitionOutcome, TripId, TripSnapshot, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by storage traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Result of inserting a new pending negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored
    Inserted,
    /// Rejected: the buyer already has a pending negotiation on this trip
    DuplicatePending,
    /// Rejected: the buyer already holds a confirmed reservation on this trip
    ExistingReservation,
}

/// Result of replacing a pending offer with a seller counter-offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupersedeOutcome {
    /// Original rejected and counter stored, together
    Superseded {
        /// The original, now `Rejected` with reason `Superseded`
        original: Negotiation,
        /// The new pending counter-offer
        counter: Negotiation,
    },
    /// Nothing changed: the original was no longer pending
    AlreadyTerminal(NegotiationStatus),
}

/// Durable storage for negotiation records.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one instance
/// across all request workers and the expiry sweeper.
pub trait NegotiationStore: Send + Sync {
    /// Insert a new `Pending` negotiation.
    ///
    /// Must enforce at most one pending negotiation per (trip, buyer) even
    /// under concurrent inserts, reporting [`InsertOutcome::DuplicatePending`].
    /// The absence of a reservation for the same (trip, buyer) is checked in
    /// the same atomic unit, serialized against [`Self::accept_and_book`],
    /// reporting [`InsertOutcome::ExistingReservation`].
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn insert(&self, negotiation: Negotiation) -> StoreFuture<'_, InsertOutcome>;

    /// Load a negotiation by ID.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn get(&self, id: NegotiationId) -> StoreFuture<'_, Option<Negotiation>>;

    /// All negotiations on a trip, newest first.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn list_by_trip(&self, trip_id: TripId) -> StoreFuture<'_, Vec<Negotiation>>;

    /// Negotiations where `actor` is the buyer or the seller, newest first.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn list_by_actor(
        &self,
        actor: UserId,
        role: ActorRole,
        status: Option<NegotiationStatus>,
        page: Page,
    ) -> StoreFuture<'_, Vec<Negotiation>>;

    /// Apply `transition` iff the record is currently in `expected` status.
    ///
    /// This is the only single-record mutator of `status`. Exactly one of
    /// several concurrent callers observes [`TransitionOutcome::Applied`].
    ///
    /// # Errors
    ///
    /// - `NotFound`: no record with this ID
    /// - `Database`: query failed
    fn conditional_transition(
        &self,
        id: NegotiationId,
        expected: NegotiationStatus,
        transition: Transition,
    ) -> StoreFuture<'_, TransitionOutcome>;

    /// Reject a pending original and insert its counter-offer in one unit.
    ///
    /// Either both writes happen or neither does.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no original with this ID
    /// - `Database`: query failed
    fn supersede_with_counter(
        &self,
        original_id: NegotiationId,
        transition: Transition,
        counter: Negotiation,
    ) -> StoreFuture<'_, SupersedeOutcome>;

    /// Accept a pending negotiation and book it in one unit.
    ///
    /// Within one atomic step: transition `Pending → Accepted`, decrement the
    /// trip's seats if sufficient (marking a scheduled trip full at zero), and
    /// create the reservation. A trip that is no longer scheduled is not
    /// booked. If any part fails nothing is changed.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no negotiation or trip with this ID
    /// - `Database`: query failed
    fn accept_and_book(
        &self,
        id: NegotiationId,
        plan: BookingPlan,
    ) -> StoreFuture<'_, ConversionOutcome>;

    /// IDs of pending negotiations with `expires_at <= now`, oldest deadline first.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn lapsed_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<NegotiationId>>;

    /// Aggregate statistics for a buyer, seller or trip.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn summarize(&self, scope: SummaryScope) -> StoreFuture<'_, NegotiationSummary>;
}

/// The external trip inventory.
pub trait ResourceLedger: Send + Sync {
    /// Read a trip.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn trip(&self, id: TripId) -> StoreFuture<'_, Option<TripSnapshot>>;

    /// Take `count` seats iff at least `count` remain, as one conditional update.
    ///
    /// Marks a scheduled trip full when it reaches zero; other statuses are kept.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no trip with this ID
    /// - `Database`: query failed
    fn decrement_seats(&self, id: TripId, count: u32) -> StoreFuture<'_, SeatDecrement>;

    /// Whether `buyer` holds a confirmed reservation on `trip`.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn has_confirmed_reservation(&self, trip: TripId, buyer: UserId) -> StoreFuture<'_, bool>;
}

/// Per-seller auto-accept configuration.
pub trait PolicyStore: Send + Sync {
    /// The seller's stored policy, if any.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn seller_policy(&self, seller: UserId) -> StoreFuture<'_, Option<SellerPolicy>>;

    /// Create or replace the seller's policy.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn save_seller_policy(&self, seller: UserId, policy: SellerPolicy) -> StoreFuture<'_, ()>;
}
