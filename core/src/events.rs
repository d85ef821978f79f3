//! Notification events emitted by the engine.
//!
//! The engine decides *that* and *what* to notify; delivery (push, SMS,
//! email) belongs to whatever drains the [`NotificationSink`]. Enqueueing is
//! fire-and-forget and must never block a state transition.

use crate::types::{Money, Negotiation, NegotiationId, Reservation, ReservationId, TripId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something a marketplace user should be told about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NegotiationEvent {
    /// A buyer made an offer on the seller's trip
    OfferReceived {
        /// Negotiation ID
        negotiation_id: NegotiationId,
        /// Trip ID
        trip_id: TripId,
        /// Passenger making the offer
        buyer_id: UserId,
        /// Offered per-seat price
        proposed_price: Money,
        /// Advertised per-seat price
        original_price: Money,
        /// Discount in percent of the advertised price
        discount_percentage: f64,
        /// Seats requested
        seats_requested: u32,
        /// Buyer's message
        message: Option<String>,
    },

    /// The seller accepted or declined the buyer's offer
    OfferResponded {
        /// Negotiation ID
        negotiation_id: NegotiationId,
        /// Trip ID
        trip_id: TripId,
        /// Whether the offer was accepted
        accepted: bool,
        /// Accepted by seller policy rather than by hand
        auto_accepted: bool,
        /// Agreed price when accepted
        final_price: Option<Money>,
        /// Seller's message
        response_message: Option<String>,
    },

    /// The seller answered with a counter price
    CounterOfferReceived {
        /// The new negotiation carrying the counter price
        negotiation_id: NegotiationId,
        /// The buyer offer it replaced
        original_negotiation_id: NegotiationId,
        /// Trip ID
        trip_id: TripId,
        /// Seller's counter price
        counter_price: Money,
        /// What the buyer had offered
        original_offer: Money,
        /// Seller's message
        message: Option<String>,
        /// Deadline to accept
        expires_at: DateTime<Utc>,
    },

    /// The buyer accepted the seller's counter-offer
    CounterOfferAccepted {
        /// Negotiation ID
        negotiation_id: NegotiationId,
        /// Trip ID
        trip_id: TripId,
        /// Passenger
        buyer_id: UserId,
        /// Agreed price
        final_price: Money,
    },

    /// The buyer withdrew a pending negotiation
    OfferWithdrawn {
        /// Negotiation ID
        negotiation_id: NegotiationId,
        /// Trip ID
        trip_id: TripId,
        /// Passenger
        buyer_id: UserId,
    },

    /// The negotiation lapsed without a response
    OfferExpired {
        /// Negotiation ID
        negotiation_id: NegotiationId,
        /// Trip ID
        trip_id: TripId,
    },

    /// An accepted negotiation became a confirmed reservation
    BookingConfirmed {
        /// Negotiation ID
        negotiation_id: NegotiationId,
        /// Reservation ID
        reservation_id: ReservationId,
        /// Trip ID
        trip_id: TripId,
        /// Seats booked
        seats_booked: u32,
        /// Agreed per-seat price
        final_price: Money,
        /// `final_price × seats_booked`
        total_price: Money,
    },
}

impl NegotiationEvent {
    /// Stable event name, used for metrics labels and logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OfferReceived { .. } => "offer_received",
            Self::OfferResponded { .. } => "offer_responded",
            Self::CounterOfferReceived { .. } => "counter_offer_received",
            Self::CounterOfferAccepted { .. } => "counter_offer_accepted",
            Self::OfferWithdrawn { .. } => "offer_withdrawn",
            Self::OfferExpired { .. } => "offer_expired",
            Self::BookingConfirmed { .. } => "booking_confirmed",
        }
    }

    /// Negotiation the event concerns
    #[must_use]
    pub const fn negotiation_id(&self) -> NegotiationId {
        match self {
            Self::OfferReceived { negotiation_id, .. }
            | Self::OfferResponded { negotiation_id, .. }
            | Self::CounterOfferReceived { negotiation_id, .. }
            | Self::CounterOfferAccepted { negotiation_id, .. }
            | Self::OfferWithdrawn { negotiation_id, .. }
            | Self::OfferExpired { negotiation_id, .. }
            | Self::BookingConfirmed { negotiation_id, .. } => *negotiation_id,
        }
    }

    /// Offer received by the seller of `negotiation`
    #[must_use]
    pub fn offer_received(negotiation: &Negotiation) -> Self {
        Self::OfferReceived {
            negotiation_id: negotiation.id,
            trip_id: negotiation.trip_id,
            buyer_id: negotiation.buyer_id,
            proposed_price: negotiation.proposed_price,
            original_price: negotiation.original_price,
            discount_percentage: negotiation.discount_percentage(negotiation.proposed_price),
            seats_requested: negotiation.seats_requested,
            message: negotiation.message.clone(),
        }
    }

    /// Booking confirmation for `reservation`
    #[must_use]
    pub fn booking_confirmed(negotiation: &Negotiation, reservation: &Reservation) -> Self {
        Self::BookingConfirmed {
            negotiation_id: negotiation.id,
            reservation_id: reservation.id,
            trip_id: reservation.trip_id,
            seats_booked: reservation.seats_booked,
            final_price: negotiation.final_price.unwrap_or(negotiation.proposed_price),
            total_price: reservation.total_price,
        }
    }
}

/// An event addressed to one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Who should be told
    pub recipient: UserId,
    /// What happened
    pub event: NegotiationEvent,
    /// When the engine emitted it
    pub occurred_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification
    #[must_use]
    pub const fn new(recipient: UserId, event: NegotiationEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            recipient,
            event,
            occurred_at,
        }
    }
}

/// Outbound queue for notifications.
///
/// Implementations must return immediately. A full or closed queue is the
/// sink's problem to log; it is never reported back into a transition.
pub trait NotificationSink: Send + Sync {
    /// Enqueue a notification for delivery
    fn enqueue(&self, notification: Notification);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = NegotiationEvent::OfferExpired {
            negotiation_id: NegotiationId::new(),
            trip_id: TripId::new(),
        };
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["type"], "offer_expired");
        assert_eq!(event.name(), "offer_expired");
    }
}
