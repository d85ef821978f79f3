//! In-memory marketplace for fast, deterministic engine tests.
//!
//! [`InMemoryMarketplace`] implements [`NegotiationStore`], [`ResourceLedger`]
//! and [`PolicyStore`] over a single mutex, so every composite operation
//! (counter-offer supersede, accept-and-book) is trivially atomic.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use fare_negotiation_core::{
    ActorRole, BookingPlan, ConversionOutcome, InsertOutcome, Negotiation, NegotiationId,
    NegotiationStatus, NegotiationStore, NegotiationSummary, Page, PolicyStore, Reservation,
    ResourceLedger, SeatDecrement, SellerPolicy, StoreError, StoreFuture, SummaryScope,
    SupersedeOutcome, Transition, TransitionOutcome, TripId, TripSnapshot, TripStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    negotiations: HashMap<NegotiationId, (u64, Negotiation)>,
    next_seq: u64,
    trips: HashMap<TripId, TripSnapshot>,
    reservations: Vec<Reservation>,
    policies: HashMap<UserId, SellerPolicy>,
    unavailable: bool,
}

impl State {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Database("store unavailable".to_string()));
        }
        Ok(())
    }

    fn put(&mut self, negotiation: Negotiation) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.negotiations.insert(negotiation.id, (seq, negotiation));
    }

    fn has_reservation(&self, trip_id: TripId, buyer_id: UserId) -> bool {
        self.reservations
            .iter()
            .any(|r| r.trip_id == trip_id && r.buyer_id == buyer_id)
    }

    fn has_pending(&self, trip_id: TripId, buyer_id: UserId) -> bool {
        self.negotiations.values().any(|(_, n)| {
            n.trip_id == trip_id && n.buyer_id == buyer_id && n.is_pending()
        })
    }

    /// Newest first, insertion order breaking ties.
    fn sorted<F>(&self, filter: F) -> Vec<Negotiation>
    where
        F: Fn(&Negotiation) -> bool,
    {
        let mut matching: Vec<&(u64, Negotiation)> =
            self.negotiations.values().filter(|(_, n)| filter(n)).collect();
        matching.sort_by(|(sa, a), (sb, b)| b.created_at.cmp(&a.created_at).then(sb.cmp(sa)));
        matching.into_iter().map(|(_, n)| n.clone()).collect()
    }
}

fn take_seats(trip: &mut TripSnapshot, count: u32) -> SeatDecrement {
    if trip.available_seats < count {
        return SeatDecrement::Insufficient {
            available: trip.available_seats,
        };
    }
    trip.available_seats -= count;
    if trip.available_seats == 0 && trip.status == TripStatus::Scheduled {
        trip.status = TripStatus::Full;
    }
    SeatDecrement::Applied {
        remaining: trip.available_seats,
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{what} {id}"))
}

/// In-memory negotiation store, trip ledger and policy store.
///
/// Clones share state.
///
/// # Example
///
/// ```
/// use fare_negotiation_testing::{fixtures, InMemoryMarketplace};
/// use fare_negotiation_core::{ResourceLedger, SeatDecrement, UserId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let market = InMemoryMarketplace::new();
/// let trip = market.add_trip(fixtures::scheduled_trip(UserId::new(), 20_000, 3));
///
/// let result = market.decrement_seats(trip, 2).await?;
/// assert_eq!(result, SeatDecrement::Applied { remaining: 1 });
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryMarketplace {
    state: Arc<Mutex<State>>,
}

impl InMemoryMarketplace {
    /// Create an empty marketplace
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a trip on the ledger, returning its ID
    pub fn add_trip(&self, trip: TripSnapshot) -> TripId {
        let id = trip.id;
        self.state.lock().unwrap().trips.insert(id, trip);
        id
    }

    /// Change a trip in place (e.g. cancel it, or sell seats out of band)
    pub fn update_trip<F>(&self, id: TripId, f: F)
    where
        F: FnOnce(&mut TripSnapshot),
    {
        if let Some(trip) = self.state.lock().unwrap().trips.get_mut(&id) {
            f(trip);
        }
    }

    /// Current ledger view of a trip
    #[must_use]
    pub fn trip_snapshot(&self, id: TripId) -> Option<TripSnapshot> {
        self.state.lock().unwrap().trips.get(&id).cloned()
    }

    /// Store a record as-is, bypassing every check
    ///
    /// Useful for seeding lapsed or terminal negotiations.
    pub fn seed_negotiation(&self, negotiation: Negotiation) {
        self.state.lock().unwrap().put(negotiation);
    }

    /// Record a confirmed reservation that did not come from a negotiation
    pub fn seed_reservation(&self, reservation: Reservation) {
        self.state.lock().unwrap().reservations.push(reservation);
    }

    /// Current stored value of a negotiation
    #[must_use]
    pub fn negotiation(&self, id: NegotiationId) -> Option<Negotiation> {
        self.state
            .lock()
            .unwrap()
            .negotiations
            .get(&id)
            .map(|(_, n)| n.clone())
    }

    /// Every stored negotiation, newest first
    #[must_use]
    pub fn negotiations(&self) -> Vec<Negotiation> {
        self.state.lock().unwrap().sorted(|_| true)
    }

    /// Every reservation, in creation order
    #[must_use]
    pub fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().unwrap().reservations.clone()
    }

    /// Reservations created for one negotiation
    #[must_use]
    pub fn reservations_for(&self, negotiation_id: NegotiationId) -> Vec<Reservation> {
        self.state
            .lock()
            .unwrap()
            .reservations
            .iter()
            .filter(|r| r.negotiation_id == negotiation_id)
            .cloned()
            .collect()
    }

    /// Make every subsequent call fail with a database error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }
}

impl NegotiationStore for InMemoryMarketplace {
    fn insert(&self, negotiation: Negotiation) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.check_available()?;
            if state.has_pending(negotiation.trip_id, negotiation.buyer_id) {
                return Ok(InsertOutcome::DuplicatePending);
            }
            if state.has_reservation(negotiation.trip_id, negotiation.buyer_id) {
                return Ok(InsertOutcome::ExistingReservation);
            }
            state.put(negotiation);
            Ok(InsertOutcome::Inserted)
        })
    }

    fn get(&self, id: NegotiationId) -> StoreFuture<'_, Option<Negotiation>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            Ok(state.negotiations.get(&id).map(|(_, n)| n.clone()))
        })
    }

    fn list_by_trip(&self, trip_id: TripId) -> StoreFuture<'_, Vec<Negotiation>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            Ok(state.sorted(|n| n.trip_id == trip_id))
        })
    }

    fn list_by_actor(
        &self,
        actor: UserId,
        role: ActorRole,
        status: Option<NegotiationStatus>,
        page: Page,
    ) -> StoreFuture<'_, Vec<Negotiation>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            let records = state.sorted(|n| {
                let party = match role {
                    ActorRole::Buyer => n.buyer_id,
                    ActorRole::Seller => n.seller_id,
                };
                party == actor && status.is_none_or(|s| n.status == s)
            });
            Ok(records
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect())
        })
    }

    fn conditional_transition(
        &self,
        id: NegotiationId,
        expected: NegotiationStatus,
        transition: Transition,
    ) -> StoreFuture<'_, TransitionOutcome> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.check_available()?;
            let (_, negotiation) = state
                .negotiations
                .get_mut(&id)
                .ok_or_else(|| not_found("negotiation", id))?;
            if negotiation.status != expected {
                return Ok(TransitionOutcome::AlreadyTerminal(negotiation.status));
            }
            transition.apply_to(negotiation);
            Ok(TransitionOutcome::Applied(negotiation.clone()))
        })
    }

    fn supersede_with_counter(
        &self,
        original_id: NegotiationId,
        transition: Transition,
        counter: Negotiation,
    ) -> StoreFuture<'_, SupersedeOutcome> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.check_available()?;
            let (_, original) = state
                .negotiations
                .get_mut(&original_id)
                .ok_or_else(|| not_found("negotiation", original_id))?;
            if !original.is_pending() {
                return Ok(SupersedeOutcome::AlreadyTerminal(original.status));
            }
            transition.apply_to(original);
            let original = original.clone();
            state.put(counter.clone());
            Ok(SupersedeOutcome::Superseded { original, counter })
        })
    }

    fn accept_and_book(
        &self,
        id: NegotiationId,
        plan: BookingPlan,
    ) -> StoreFuture<'_, ConversionOutcome> {
        Box::pin(async move {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.check_available()?;

            let (_, negotiation) = state
                .negotiations
                .get_mut(&id)
                .ok_or_else(|| not_found("negotiation", id))?;
            if !negotiation.is_pending() {
                return Ok(ConversionOutcome::AlreadyTerminal(negotiation.status));
            }

            let trip_id = plan.reservation.trip_id;
            let trip = state
                .trips
                .get_mut(&trip_id)
                .ok_or_else(|| not_found("trip", trip_id))?;
            if trip.status != TripStatus::Scheduled {
                return Ok(ConversionOutcome::TripNotScheduled(trip.status));
            }
            let requested = plan.reservation.seats_booked;
            let remaining_seats = match take_seats(trip, requested) {
                SeatDecrement::Applied { remaining } => remaining,
                SeatDecrement::Insufficient { available } => {
                    return Ok(ConversionOutcome::InsufficientSeats {
                        requested,
                        available,
                    });
                }
            };

            plan.transition.apply_to(negotiation);
            let negotiation = negotiation.clone();
            state.reservations.push(plan.reservation.clone());

            Ok(ConversionOutcome::Converted {
                negotiation,
                reservation: plan.reservation,
                remaining_seats,
            })
        })
    }

    fn lapsed_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<NegotiationId>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            let mut lapsed: Vec<&Negotiation> = state
                .negotiations
                .values()
                .map(|(_, n)| n)
                .filter(|n| n.is_pending() && n.has_lapsed(now))
                .collect();
            lapsed.sort_by_key(|n| n.expires_at);
            Ok(lapsed
                .into_iter()
                .take(limit as usize)
                .map(|n| n.id)
                .collect())
        })
    }

    fn summarize(&self, scope: SummaryScope) -> StoreFuture<'_, NegotiationSummary> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            Ok(NegotiationSummary::from_records(
                scope,
                state.negotiations.values().map(|(_, n)| n),
            ))
        })
    }
}

impl ResourceLedger for InMemoryMarketplace {
    fn trip(&self, id: TripId) -> StoreFuture<'_, Option<TripSnapshot>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            Ok(state.trips.get(&id).cloned())
        })
    }

    fn decrement_seats(&self, id: TripId, count: u32) -> StoreFuture<'_, SeatDecrement> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.check_available()?;
            let trip = state
                .trips
                .get_mut(&id)
                .ok_or_else(|| not_found("trip", id))?;
            Ok(take_seats(trip, count))
        })
    }

    fn has_confirmed_reservation(&self, trip: TripId, buyer: UserId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            Ok(state.has_reservation(trip, buyer))
        })
    }
}

impl PolicyStore for InMemoryMarketplace {
    fn seller_policy(&self, seller: UserId) -> StoreFuture<'_, Option<SellerPolicy>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state.check_available()?;
            Ok(state.policies.get(&seller).copied())
        })
    }

    fn save_seller_policy(&self, seller: UserId, policy: SellerPolicy) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.check_available()?;
            state.policies.insert(seller, policy);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use chrono::Duration;
    use fare_negotiation_core::{Money, Party, ReservationId};

    fn pending_on(trip: &TripSnapshot, buyer: UserId, now: DateTime<Utc>) -> Negotiation {
        Negotiation {
            id: NegotiationId::new(),
            trip_id: trip.id,
            buyer_id: buyer,
            seller_id: trip.seller_id,
            original_price: trip.price_per_seat,
            proposed_price: Money::new(15_000),
            final_price: None,
            seats_requested: 2,
            status: NegotiationStatus::Pending,
            initiated_by: Party::Buyer,
            supersedes: None,
            rejection_reason: None,
            message: None,
            response_message: None,
            expires_at: now + Duration::hours(24),
            responded_at: None,
            created_at: now,
        }
    }

    fn plan_for(negotiation: &Negotiation, now: DateTime<Utc>) -> BookingPlan {
        BookingPlan {
            transition: Transition::accept(negotiation.proposed_price, None, now),
            reservation: Reservation {
                id: ReservationId::new(),
                negotiation_id: negotiation.id,
                trip_id: negotiation.trip_id,
                buyer_id: negotiation.buyer_id,
                seats_booked: negotiation.seats_requested,
                total_price: Money::new(30_000),
                created_at: now,
            },
        }
    }

    #[tokio::test]
    async fn second_pending_insert_is_rejected() {
        let market = InMemoryMarketplace::new();
        let trip = fixtures::scheduled_trip(UserId::new(), 20_000, 3);
        market.add_trip(trip.clone());
        let buyer = UserId::new();
        let now = Utc::now();

        let first = market.insert(pending_on(&trip, buyer, now)).await.unwrap();
        let second = market.insert(pending_on(&trip, buyer, now)).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::DuplicatePending);
    }

    #[tokio::test]
    async fn accept_and_book_rolls_back_when_seats_run_out() {
        let market = InMemoryMarketplace::new();
        let trip = fixtures::scheduled_trip(UserId::new(), 20_000, 1);
        market.add_trip(trip.clone());
        let now = Utc::now();
        let negotiation = pending_on(&trip, UserId::new(), now);
        market.seed_negotiation(negotiation.clone());

        let outcome = market
            .accept_and_book(negotiation.id, plan_for(&negotiation, now))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ConversionOutcome::InsufficientSeats {
                requested: 2,
                available: 1
            }
        );
        assert!(market.negotiation(negotiation.id).unwrap().is_pending());
        assert!(market.reservations().is_empty());
        assert_eq!(market.trip_snapshot(trip.id).unwrap().available_seats, 1);
    }

    #[tokio::test]
    async fn last_seats_mark_trip_full() {
        let market = InMemoryMarketplace::new();
        let trip = market.add_trip(fixtures::scheduled_trip(UserId::new(), 20_000, 2));

        assert_eq!(
            market.decrement_seats(trip, 2).await.unwrap(),
            SeatDecrement::Applied { remaining: 0 }
        );
        assert_eq!(
            market.decrement_seats(trip, 1).await.unwrap(),
            SeatDecrement::Insufficient { available: 0 }
        );
        assert_eq!(market.trip_snapshot(trip).unwrap().status, TripStatus::Full);
    }

    #[tokio::test]
    async fn insert_is_refused_once_buyer_holds_a_reservation() {
        let market = InMemoryMarketplace::new();
        let trip = fixtures::scheduled_trip(UserId::new(), 20_000, 3);
        market.add_trip(trip.clone());
        let buyer = UserId::new();
        let now = Utc::now();
        let first = pending_on(&trip, buyer, now);
        market.seed_negotiation(first.clone());
        market
            .accept_and_book(first.id, plan_for(&first, now))
            .await
            .unwrap();

        let outcome = market.insert(pending_on(&trip, buyer, now)).await.unwrap();

        assert_eq!(outcome, InsertOutcome::ExistingReservation);
        assert_eq!(market.negotiations().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_trip_is_not_booked() {
        let market = InMemoryMarketplace::new();
        let trip = fixtures::scheduled_trip(UserId::new(), 20_000, 2);
        market.add_trip(trip.clone());
        let now = Utc::now();
        let negotiation = pending_on(&trip, UserId::new(), now);
        market.seed_negotiation(negotiation.clone());
        market.update_trip(trip.id, |t| t.status = TripStatus::Cancelled);

        let outcome = market
            .accept_and_book(negotiation.id, plan_for(&negotiation, now))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ConversionOutcome::TripNotScheduled(TripStatus::Cancelled)
        );
        assert!(market.negotiation(negotiation.id).unwrap().is_pending());
        assert!(market.reservations().is_empty());
        assert_eq!(market.trip_snapshot(trip.id).unwrap().available_seats, 2);
    }

    #[tokio::test]
    async fn last_seats_keep_a_non_scheduled_status() {
        let market = InMemoryMarketplace::new();
        let trip = market.add_trip(fixtures::scheduled_trip(UserId::new(), 20_000, 1));
        market.update_trip(trip, |t| t.status = TripStatus::InProgress);

        assert_eq!(
            market.decrement_seats(trip, 1).await.unwrap(),
            SeatDecrement::Applied { remaining: 0 }
        );
        assert_eq!(
            market.trip_snapshot(trip).unwrap().status,
            TripStatus::InProgress
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let market = InMemoryMarketplace::new();
        market.set_unavailable(true);
        assert!(matches!(
            market.get(NegotiationId::new()).await,
            Err(StoreError::Database(_))
        ));
    }
}
