//! Error types for the negotiation engine.
//!
//! [`StoreError`] covers persistence failures inside repositories and the
//! ledger. [`NegotiationError`] is what every engine operation returns; its
//! [`ErrorKind`] is the flat taxonomy a transport layer maps to wire codes.

use crate::types::{NegotiationId, NegotiationStatus, TripId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by repository, ledger and policy store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be converted to or from its domain type.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The record addressed by a mutation does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Flat error classification, independent of the details carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad price or seat input
    Validation,
    /// Trip or negotiation missing
    NotFound,
    /// Actor is not allowed to act on this negotiation
    Forbidden,
    /// State conflict
    Conflict,
    /// Deadline passed
    Expired,
    /// Storage failure
    Internal,
}

/// Invalid input to an engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Offer must undercut the advertised price.
    #[error("Proposed price {proposed} must be lower than the original price {original}")]
    PriceNotBelowOriginal {
        /// Offered per-seat price
        proposed: u64,
        /// Advertised per-seat price
        original: u64,
    },

    /// Counter price outside the open interval (proposed, original).
    #[error("Counter price {counter} must be strictly between {proposed} and {original}")]
    CounterOutOfRange {
        /// Seller's counter price
        counter: u64,
        /// Buyer's offered price
        proposed: u64,
        /// Advertised price
        original: u64,
    },

    /// Zero seats, or more than the trip has.
    #[error("Requested {requested} seat(s) but {available} available")]
    SeatsUnavailable {
        /// Seats asked for
        requested: u32,
        /// Seats on the ledger
        available: u32,
    },

    /// Seat count must be at least one.
    #[error("At least one seat must be requested")]
    NoSeats,

    /// Trip is not in `Scheduled` status.
    #[error("Trip {0} is not available for price negotiation")]
    TripNotScheduled(TripId),

    /// Driver disabled negotiation on this trip.
    #[error("Trip {0} does not allow price negotiations")]
    TripNotNegotiable(TripId),

    /// Drivers cannot bid on their own trip.
    #[error("Cannot negotiate price on your own trip")]
    OwnTrip,

    /// Accepted price override outside `[proposed, original]`.
    #[error("Final price {final_price} must be between {proposed} and {original}")]
    FinalPriceOutOfRange {
        /// Override supplied
        final_price: u64,
        /// Price on the table
        proposed: u64,
        /// Advertised price
        original: u64,
    },

    /// Seller policy thresholds out of range.
    #[error("Minimum price percentage {0} must be between 50 and 100")]
    PolicyPercentage(u8),

    /// Operation only applies to a different kind of negotiation record.
    #[error("{0}")]
    WrongInitiator(&'static str),

    /// Arithmetic overflow computing a total.
    #[error("Total price overflows")]
    Overflow,
}

/// Why an operation conflicted with current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The buyer already has a pending offer on this trip
    DuplicatePending,
    /// The buyer already holds a confirmed reservation on this trip
    ExistingReservation,
    /// The negotiation already reached this terminal status
    AlreadyResolved(NegotiationStatus),
    /// The trip ran out of seats between offer and conversion
    InsufficientSeats {
        /// Seats the negotiation needs
        requested: u32,
        /// Seats available at conversion time
        available: u32,
    },
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicatePending => {
                f.write_str("a pending price negotiation already exists for this trip")
            }
            Self::ExistingReservation => {
                f.write_str("a confirmed booking already exists for this trip")
            }
            Self::AlreadyResolved(status) => write!(f, "negotiation is already {status}"),
            Self::InsufficientSeats {
                requested,
                available,
            } => write!(
                f,
                "booking could not be completed: {requested} seat(s) requested, {available} available"
            ),
        }
    }
}

/// Errors returned by engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// Bad input.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The trip does not exist on the ledger.
    #[error("Trip not found: {0}")]
    TripNotFound(TripId),

    /// The negotiation does not exist.
    #[error("Negotiation not found: {0}")]
    NegotiationNotFound(NegotiationId),

    /// The actor is not a party entitled to this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    /// The negotiation's deadline has passed.
    #[error("This offer is no longer available")]
    Expired(NegotiationId),

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl NegotiationError {
    /// Flat classification for transport mapping
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::TripNotFound(_) | Self::NegotiationNotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Conflict raised when a negotiation is found in a terminal state.
    ///
    /// An `Expired` terminal state surfaces as [`NegotiationError::Expired`] so
    /// callers see the same outcome whether or not the sweep already ran.
    #[must_use]
    pub fn already_terminal(id: NegotiationId, status: NegotiationStatus) -> Self {
        if status == NegotiationStatus::Expired {
            Self::Expired(id)
        } else {
            Self::Conflict(ConflictReason::AlreadyResolved(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_reads_as_no_longer_available() {
        let err = NegotiationError::Expired(NegotiationId::new());
        assert_eq!(err.to_string(), "This offer is no longer available");
        assert_eq!(err.kind(), ErrorKind::Expired);
    }

    #[test]
    fn terminal_expired_maps_to_expired() {
        let id = NegotiationId::new();
        assert_eq!(
            NegotiationError::already_terminal(id, NegotiationStatus::Expired),
            NegotiationError::Expired(id)
        );
        assert_eq!(
            NegotiationError::already_terminal(id, NegotiationStatus::Accepted).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn store_errors_are_internal() {
        let err: NegotiationError = StoreError::Database("down".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
