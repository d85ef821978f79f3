//! Booking Converter: turns an agreed negotiation into a reservation.
//!
//! Acceptance and booking are one store unit ([`NegotiationStore::accept_and_book`]):
//! the `Pending → Accepted` transition, the decrement-if-sufficient on the
//! trip's seats and the reservation insert commit together or not at all. A
//! negotiation is therefore never `Accepted` without its reservation, and a
//! trip that ran out of seats leaves the negotiation `Pending` with a
//! conflict reported to the caller.

use crate::metrics::NegotiationMetrics;
use fare_negotiation_core::environment::Clock;
use fare_negotiation_core::{
    BookingPlan, ConversionOutcome, Money, Negotiation, NegotiationError, NegotiationEvent,
    NegotiationStore, Notification, NotificationSink, Reservation, ReservationId, Transition,
    ValidationError,
};
use std::sync::Arc;

/// Accepts pending negotiations and books them.
#[derive(Clone)]
pub struct BookingConverter {
    negotiations: Arc<dyn NegotiationStore>,
    notifications: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl BookingConverter {
    /// Create a converter over the given store.
    #[must_use]
    pub fn new(
        negotiations: Arc<dyn NegotiationStore>,
        notifications: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            negotiations,
            notifications,
            clock,
        }
    }

    /// Accept `negotiation` at `final_price` and create its reservation.
    ///
    /// On [`ConversionOutcome::Converted`] both parties are sent a
    /// `BookingConfirmed` notification. The other outcomes change nothing.
    ///
    /// # Errors
    ///
    /// - `Validation(Overflow)` if `final_price × seats` does not fit
    /// - `Store` if persistence fails
    pub async fn accept_and_convert(
        &self,
        negotiation: &Negotiation,
        final_price: Money,
        response_message: Option<String>,
    ) -> Result<ConversionOutcome, NegotiationError> {
        let now = self.clock.now();
        let total_price = final_price
            .checked_mul(negotiation.seats_requested)
            .ok_or(ValidationError::Overflow)?;

        let plan = BookingPlan {
            transition: Transition::accept(final_price, response_message, now),
            reservation: Reservation {
                id: ReservationId::new(),
                negotiation_id: negotiation.id,
                trip_id: negotiation.trip_id,
                buyer_id: negotiation.buyer_id,
                seats_booked: negotiation.seats_requested,
                total_price,
                created_at: now,
            },
        };

        let outcome = self
            .negotiations
            .accept_and_book(negotiation.id, plan)
            .await?;

        match &outcome {
            ConversionOutcome::Converted {
                negotiation: accepted,
                reservation,
                remaining_seats,
            } => {
                NegotiationMetrics::record_conversion("converted");
                NegotiationMetrics::record_transition(accepted.status);
                tracing::info!(
                    negotiation_id = %accepted.id,
                    reservation_id = %reservation.id,
                    trip_id = %reservation.trip_id,
                    seats = reservation.seats_booked,
                    total_price = %reservation.total_price,
                    remaining_seats,
                    "Negotiation accepted and booked"
                );

                let event = NegotiationEvent::booking_confirmed(accepted, reservation);
                for recipient in [accepted.buyer_id, accepted.seller_id] {
                    self.notifications
                        .enqueue(Notification::new(recipient, event.clone(), now));
                }
            }
            ConversionOutcome::InsufficientSeats {
                requested,
                available,
            } => {
                NegotiationMetrics::record_conversion("insufficient_seats");
                tracing::warn!(
                    negotiation_id = %negotiation.id,
                    trip_id = %negotiation.trip_id,
                    requested,
                    available,
                    "Booking conversion failed: insufficient seats"
                );
            }
            ConversionOutcome::TripNotScheduled(trip_status) => {
                NegotiationMetrics::record_conversion("trip_not_scheduled");
                tracing::warn!(
                    negotiation_id = %negotiation.id,
                    trip_id = %negotiation.trip_id,
                    ?trip_status,
                    "Booking conversion failed: trip no longer scheduled"
                );
            }
            ConversionOutcome::AlreadyTerminal(status) => {
                NegotiationMetrics::record_conversion("already_terminal");
                tracing::warn!(
                    negotiation_id = %negotiation.id,
                    %status,
                    "Booking conversion lost race: negotiation already terminal"
                );
            }
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for BookingConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingConverter").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Duration;
    use fare_negotiation_core::{NegotiationId, NegotiationStatus, Party, UserId};
    use fare_negotiation_testing::{
        InMemoryMarketplace, RecordingNotificationSink, fixtures, test_clock,
    };

    fn pending(market: &InMemoryMarketplace, seats: u32, available: u32) -> Negotiation {
        let trip = fixtures::scheduled_trip(UserId::new(), 20_000, available);
        market.add_trip(trip.clone());
        let now = test_clock().now();
        let negotiation = Negotiation {
            id: NegotiationId::new(),
            trip_id: trip.id,
            buyer_id: UserId::new(),
            seller_id: trip.seller_id,
            original_price: trip.price_per_seat,
            proposed_price: Money::new(18_000),
            final_price: None,
            seats_requested: seats,
            status: NegotiationStatus::Pending,
            initiated_by: Party::Buyer,
            supersedes: None,
            rejection_reason: None,
            message: None,
            response_message: None,
            expires_at: now + Duration::hours(24),
            responded_at: None,
            created_at: now,
        };
        market.seed_negotiation(negotiation.clone());
        negotiation
    }

    fn converter(market: &InMemoryMarketplace, sink: &RecordingNotificationSink) -> BookingConverter {
        BookingConverter::new(
            Arc::new(market.clone()),
            Arc::new(sink.clone()),
            Arc::new(test_clock()),
        )
    }

    #[tokio::test]
    async fn converts_and_notifies_both_parties() {
        let market = InMemoryMarketplace::new();
        let sink = RecordingNotificationSink::new();
        let negotiation = pending(&market, 2, 3);

        let outcome = converter(&market, &sink)
            .accept_and_convert(&negotiation, Money::new(18_000), None)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ConversionOutcome::Converted {
                remaining_seats: 1,
                ..
            }
        ));
        let reservations = market.reservations_for(negotiation.id);
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].total_price, Money::new(36_000));
        assert_eq!(
            sink.event_names_for(negotiation.buyer_id),
            vec!["booking_confirmed"]
        );
        assert_eq!(
            sink.event_names_for(negotiation.seller_id),
            vec!["booking_confirmed"]
        );
    }

    #[tokio::test]
    async fn insufficient_seats_changes_nothing() {
        let market = InMemoryMarketplace::new();
        let sink = RecordingNotificationSink::new();
        let negotiation = pending(&market, 3, 2);

        let outcome = converter(&market, &sink)
            .accept_and_convert(&negotiation, Money::new(18_000), None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ConversionOutcome::InsufficientSeats {
                requested: 3,
                available: 2
            }
        );
        assert!(market.negotiation(negotiation.id).unwrap().is_pending());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn overflowing_total_is_rejected() {
        let market = InMemoryMarketplace::new();
        let sink = RecordingNotificationSink::new();
        let negotiation = pending(&market, 2, 3);

        let result = converter(&market, &sink)
            .accept_and_convert(&negotiation, Money::new(u64::MAX), None)
            .await;

        assert_eq!(
            result,
            Err(NegotiationError::Validation(ValidationError::Overflow))
        );
    }
}
