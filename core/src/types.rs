//! Domain types for the fare negotiation engine.
//!
//! Value objects (identifiers, money), the `Negotiation` record with its
//! status lifecycle, the read-only view of a trip on the resource ledger,
//! and the reservation produced when an offer converts into a booking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::StoreError;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a negotiation record
    NegotiationId
);
uuid_id!(
    /// Unique identifier for a trip on the resource ledger
    TripId
);
uuid_id!(
    /// Unique identifier for a marketplace user (buyer or seller)
    UserId
);
uuid_id!(
    /// Unique identifier for a confirmed reservation
    ReservationId
);

// ============================================================================
// Money
// ============================================================================

/// A non-negative amount in the smallest currency unit.
///
/// Prices are integers end to end; percentages are derived with integer
/// cross-multiplication so that policy decisions are exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from an amount in minor units
    #[must_use]
    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn amount(&self) -> u64 {
        self.0
    }

    /// Subtracts, returning `None` on underflow
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Multiplies by a seat count, returning `None` on overflow
    #[must_use]
    pub const fn checked_mul(self, seats: u32) -> Option<Self> {
        match self.0.checked_mul(seats as u64) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Converts to the signed representation used by SQL `BIGINT` columns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the amount exceeds `i64::MAX`.
    pub fn to_i64(self) -> Result<i64, StoreError> {
        i64::try_from(self.0)
            .map_err(|_| StoreError::Serialization(format!("amount {} exceeds BIGINT", self.0)))
    }

    /// Converts from a SQL `BIGINT` column.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the stored amount is negative.
    pub fn from_i64(value: i64) -> Result<Self, StoreError> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| StoreError::Serialization(format!("negative amount {value}")))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Negotiation lifecycle
// ============================================================================

/// Status of a negotiation.
///
/// `Pending` is the only non-terminal state. No transition ever leaves a
/// terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    /// Awaiting a response from the counterpart
    Pending,
    /// Agreed; a reservation exists for it
    Accepted,
    /// Declined, superseded by a counter-offer, or withdrawn
    Rejected,
    /// Deadline passed without a response
    Expired,
}

impl NegotiationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            _ => Err(StoreError::Serialization(format!(
                "Invalid negotiation status: {s}"
            ))),
        }
    }

    /// Whether this status is terminal
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the trip opened a negotiation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// The passenger buying seats
    Buyer,
    /// The driver selling seats
    Seller,
}

impl Party {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known party.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            _ => Err(StoreError::Serialization(format!("Invalid party: {s}"))),
        }
    }
}

/// Why a negotiation ended as `Rejected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The counterpart declined the offer
    Declined,
    /// The seller replied with a counter-offer
    Superseded,
    /// The buyer withdrew while it was still pending
    Withdrawn,
}

impl RejectionReason {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Declined => "declined",
            Self::Superseded => "superseded",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known reason.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "declined" => Ok(Self::Declined),
            "superseded" => Ok(Self::Superseded),
            "withdrawn" => Ok(Self::Withdrawn),
            _ => Err(StoreError::Serialization(format!(
                "Invalid rejection reason: {s}"
            ))),
        }
    }
}

/// A price negotiation over seats on one trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    /// Negotiation ID
    pub id: NegotiationId,
    /// Trip being negotiated
    pub trip_id: TripId,
    /// Passenger buying seats
    pub buyer_id: UserId,
    /// Driver owning the trip (snapshot at creation)
    pub seller_id: UserId,
    /// Advertised per-seat price at offer time
    pub original_price: Money,
    /// Per-seat price on the table
    pub proposed_price: Money,
    /// Agreed per-seat price, set only on acceptance
    pub final_price: Option<Money>,
    /// Seats requested (at least one)
    pub seats_requested: u32,
    /// Lifecycle status
    pub status: NegotiationStatus,
    /// Who put `proposed_price` on the table
    pub initiated_by: Party,
    /// The offer this counter-offer replaced
    pub supersedes: Option<NegotiationId>,
    /// Set when status is `Rejected`
    pub rejection_reason: Option<RejectionReason>,
    /// Free text from the initiator
    pub message: Option<String>,
    /// Free text attached to the terminal transition
    pub response_message: Option<String>,
    /// Response deadline
    pub expires_at: DateTime<Utc>,
    /// When the terminal transition happened
    pub responded_at: Option<DateTime<Utc>>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl Negotiation {
    /// Whether the record is still awaiting a response
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == NegotiationStatus::Pending
    }

    /// Whether this record was opened by the seller as a counter-offer
    #[must_use]
    pub fn is_counter_offer(&self) -> bool {
        self.initiated_by == Party::Seller
    }

    /// Whether the response deadline has passed at `now`
    #[must_use]
    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether `user` is the buyer or the seller
    #[must_use]
    pub fn is_party(&self, user: UserId) -> bool {
        self.buyer_id == user || self.seller_id == user
    }

    /// `final_price × seats_requested`, once accepted
    #[must_use]
    pub fn total_price(&self) -> Option<Money> {
        self.final_price
            .and_then(|price| price.checked_mul(self.seats_requested))
    }

    /// Discount off the advertised price, in whole percent of `original_price`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn discount_percentage(&self, price: Money) -> f64 {
        if self.original_price.amount() == 0 {
            return 0.0;
        }
        let discount = self
            .original_price
            .checked_sub(price)
            .unwrap_or(Money::ZERO);
        discount.amount() as f64 / self.original_price.amount() as f64 * 100.0
    }
}

/// The terminal state applied by a conditional transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Target status (never `Pending`)
    pub status: NegotiationStatus,
    /// Agreed price, for acceptances
    pub final_price: Option<Money>,
    /// Reason, for rejections
    pub rejection_reason: Option<RejectionReason>,
    /// Response text
    pub response_message: Option<String>,
    /// Transition timestamp
    pub responded_at: DateTime<Utc>,
}

impl Transition {
    /// Accept at `final_price`
    #[must_use]
    pub const fn accept(
        final_price: Money,
        response_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: NegotiationStatus::Accepted,
            final_price: Some(final_price),
            rejection_reason: None,
            response_message,
            responded_at: now,
        }
    }

    /// Reject for `reason`
    #[must_use]
    pub const fn reject(
        reason: RejectionReason,
        response_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: NegotiationStatus::Rejected,
            final_price: None,
            rejection_reason: Some(reason),
            response_message,
            responded_at: now,
        }
    }

    /// Expire
    #[must_use]
    pub const fn expire(now: DateTime<Utc>) -> Self {
        Self {
            status: NegotiationStatus::Expired,
            final_price: None,
            rejection_reason: None,
            response_message: None,
            responded_at: now,
        }
    }

    /// Apply this transition to a pending record in memory.
    ///
    /// Stores call this after winning the compare-and-swap so that the
    /// returned record matches what was persisted.
    pub fn apply_to(&self, negotiation: &mut Negotiation) {
        negotiation.status = self.status;
        negotiation.final_price = self.final_price;
        negotiation.rejection_reason = self.rejection_reason;
        negotiation.response_message.clone_from(&self.response_message);
        negotiation.responded_at = Some(self.responded_at);
    }
}

/// Result of a conditional transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The record was in the expected state and now carries the new one
    Applied(Negotiation),
    /// Another writer got there first; the record is in this terminal state
    AlreadyTerminal(NegotiationStatus),
}

// ============================================================================
// Resource ledger
// ============================================================================

/// Lifecycle status of a trip on the resource ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Open for bookings and negotiation
    Scheduled,
    /// No seats left
    Full,
    /// Under way
    InProgress,
    /// Finished
    Completed,
    /// Called off by the driver
    Cancelled,
}

impl TripStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Full => "full",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known trip status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "full" => Ok(Self::Full),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::Serialization(format!(
                "Invalid trip status: {s}"
            ))),
        }
    }
}

/// What the engine reads about a trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSnapshot {
    /// Trip ID
    pub id: TripId,
    /// Driver selling the seats
    pub seller_id: UserId,
    /// Advertised per-seat price
    pub price_per_seat: Money,
    /// Seats still available
    pub available_seats: u32,
    /// Lifecycle status
    pub status: TripStatus,
    /// Whether the driver accepts price offers
    pub negotiable: bool,
}

/// Result of a decrement-if-sufficient on `available_seats`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeatDecrement {
    /// Seats were taken
    Applied {
        /// Seats left after the decrement
        remaining: u32,
    },
    /// Not enough seats; nothing changed
    Insufficient {
        /// Seats available when the decrement was attempted
        available: u32,
    },
}

// ============================================================================
// Booking conversion
// ============================================================================

/// A confirmed reservation created from an accepted negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID
    pub id: ReservationId,
    /// Negotiation that produced it
    pub negotiation_id: NegotiationId,
    /// Trip booked
    pub trip_id: TripId,
    /// Passenger
    pub buyer_id: UserId,
    /// Seats booked (equals `seats_requested`)
    pub seats_booked: u32,
    /// `final_price × seats_booked`
    pub total_price: Money,
    /// When it was created
    pub created_at: DateTime<Utc>,
}

/// Everything a store needs to accept a negotiation and book it in one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingPlan {
    /// Transition to apply to the pending negotiation
    pub transition: Transition,
    /// Reservation to create once seats are secured
    pub reservation: Reservation,
}

/// Result of an atomic accept-and-book.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Negotiation accepted, seats decremented, reservation created
    Converted {
        /// The accepted negotiation
        negotiation: Negotiation,
        /// The reservation created for it
        reservation: Reservation,
        /// Seats left on the trip
        remaining_seats: u32,
    },
    /// Nothing changed: the trip no longer has enough seats
    InsufficientSeats {
        /// Seats the negotiation asked for
        requested: u32,
        /// Seats available at conversion time
        available: u32,
    },
    /// Nothing changed: the trip stopped taking bookings
    TripNotScheduled(TripStatus),
    /// Nothing changed: the negotiation was no longer pending
    AlreadyTerminal(NegotiationStatus),
}

// ============================================================================
// Queries
// ============================================================================

/// Offset/limit pagination, newest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    /// Records to skip
    pub offset: u32,
    /// Maximum records to return
    pub limit: u32,
}

impl Page {
    /// Create a page
    #[must_use]
    pub const fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// Clamp the limit to `max`
    #[must_use]
    pub fn capped(self, max: u32) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.min(max),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

/// Role an actor lists negotiations in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Offers the actor made as a passenger
    Buyer,
    /// Offers the actor received as a driver
    Seller,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending(original: u64, proposed: u64) -> Negotiation {
        let now = Utc::now();
        Negotiation {
            id: NegotiationId::new(),
            trip_id: TripId::new(),
            buyer_id: UserId::new(),
            seller_id: UserId::new(),
            original_price: Money::new(original),
            proposed_price: Money::new(proposed),
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

    #[test]
    fn status_roundtrip() {
        for status in &[
            NegotiationStatus::Pending,
            NegotiationStatus::Accepted,
            NegotiationStatus::Rejected,
            NegotiationStatus::Expired,
        ] {
            let parsed = NegotiationStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
        assert!(NegotiationStatus::parse("withdrawn").is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!NegotiationStatus::Pending.is_terminal());
        assert!(NegotiationStatus::Accepted.is_terminal());
        assert!(NegotiationStatus::Rejected.is_terminal());
        assert!(NegotiationStatus::Expired.is_terminal());
    }

    #[test]
    fn lapsed_at_deadline() {
        let n = pending(20_000, 16_000);
        assert!(!n.has_lapsed(n.expires_at - Duration::seconds(1)));
        assert!(n.has_lapsed(n.expires_at));
    }

    #[test]
    fn accept_transition_sets_total() {
        let mut n = pending(20_000, 18_000);
        let now = Utc::now();
        Transition::accept(Money::new(18_000), None, now).apply_to(&mut n);

        assert_eq!(n.status, NegotiationStatus::Accepted);
        assert_eq!(n.total_price(), Some(Money::new(36_000)));
        assert_eq!(n.responded_at, Some(now));
    }

    #[test]
    fn discount_percentage_of_original() {
        let n = pending(20_000, 17_000);
        let pct = n.discount_percentage(Money::new(17_000));
        assert!((pct - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn money_sql_conversion_rejects_negative() {
        assert!(Money::from_i64(-1).is_err());
        assert_eq!(Money::from_i64(42).unwrap(), Money::new(42));
        assert!(Money::new(u64::MAX).to_i64().is_err());
    }

    #[test]
    fn page_is_capped() {
        assert_eq!(Page::new(10, 500).capped(100), Page::new(10, 100));
    }
}
