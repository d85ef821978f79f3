//! Negotiation statistics for buyers, sellers and trips.

use crate::types::{Money, Negotiation, NegotiationStatus, TripId, UserId};
use serde::{Deserialize, Serialize};

/// Which negotiations a summary covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum SummaryScope {
    /// Offers a passenger made
    Buyer(UserId),
    /// Offers a driver received
    Seller(UserId),
    /// Every negotiation on one trip
    Trip(TripId),
}

impl SummaryScope {
    /// Whether `negotiation` falls inside this scope
    #[must_use]
    pub fn contains(&self, negotiation: &Negotiation) -> bool {
        match self {
            Self::Buyer(user) => negotiation.buyer_id == *user,
            Self::Seller(user) => negotiation.seller_id == *user,
            Self::Trip(trip) => negotiation.trip_id == *trip,
        }
    }
}

/// Aggregate counts and rates.
///
/// Percentages are `0.0` when their denominator is empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NegotiationSummary {
    /// All negotiations in scope
    pub total: u64,
    /// Still awaiting a response
    pub pending: u64,
    /// Accepted and booked
    pub accepted: u64,
    /// Declined, superseded or withdrawn
    pub rejected: u64,
    /// Lapsed
    pub expired: u64,
    /// `accepted / total × 100`
    pub acceptance_rate: f64,
    /// Mean discount off the advertised price over accepted negotiations, in percent
    pub average_discount_percentage: f64,
    /// Mean per-seat price put on the table
    pub average_proposed_price: f64,
}

impl NegotiationSummary {
    /// Build a summary from raw counters.
    ///
    /// `accepted_discount_sum` is the sum of per-negotiation discount
    /// percentages over accepted negotiations; `proposed_sum` the sum of
    /// proposed prices over all of them.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(
        pending: u64,
        accepted: u64,
        rejected: u64,
        expired: u64,
        accepted_discount_sum: f64,
        proposed_sum: u128,
    ) -> Self {
        let total = pending + accepted + rejected + expired;
        let ratio = |numerator: f64, denominator: u64| {
            if denominator == 0 {
                0.0
            } else {
                numerator / denominator as f64
            }
        };

        Self {
            total,
            pending,
            accepted,
            rejected,
            expired,
            acceptance_rate: ratio(accepted as f64 * 100.0, total),
            average_discount_percentage: ratio(accepted_discount_sum, accepted),
            average_proposed_price: ratio(proposed_sum as f64, total),
        }
    }

    /// Summarize every record in `records` that falls inside `scope`.
    #[must_use]
    pub fn from_records<'a, I>(scope: SummaryScope, records: I) -> Self
    where
        I: IntoIterator<Item = &'a Negotiation>,
    {
        let (mut pending, mut accepted, mut rejected, mut expired) = (0, 0, 0, 0);
        let mut discount_sum = 0.0;
        let mut proposed_sum: u128 = 0;

        for negotiation in records.into_iter().filter(|n| scope.contains(n)) {
            proposed_sum += u128::from(negotiation.proposed_price.amount());
            match negotiation.status {
                NegotiationStatus::Pending => pending += 1,
                NegotiationStatus::Rejected => rejected += 1,
                NegotiationStatus::Expired => expired += 1,
                NegotiationStatus::Accepted => {
                    accepted += 1;
                    let price = negotiation.final_price.unwrap_or(Money::ZERO);
                    discount_sum += negotiation.discount_percentage(price);
                }
            }
        }

        Self::from_counts(pending, accepted, rejected, expired, discount_sum, proposed_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NegotiationId, Party};
    use chrono::Utc;

    fn record(buyer: UserId, status: NegotiationStatus, proposed: u64, final_price: Option<u64>) -> Negotiation {
        let now = Utc::now();
        Negotiation {
            id: NegotiationId::new(),
            trip_id: TripId::new(),
            buyer_id: buyer,
            seller_id: UserId::new(),
            original_price: Money::new(20_000),
            proposed_price: Money::new(proposed),
            final_price: final_price.map(Money::new),
            seats_requested: 1,
            status,
            initiated_by: Party::Buyer,
            supersedes: None,
            rejection_reason: None,
            message: None,
            response_message: None,
            expires_at: now,
            responded_at: None,
            created_at: now,
        }
    }

    #[test]
    fn empty_scope_has_zero_rates() {
        let summary = NegotiationSummary::from_records(SummaryScope::Buyer(UserId::new()), &Vec::<Negotiation>::new());
        assert_eq!(summary, NegotiationSummary::default());
    }

    #[test]
    fn buyer_summary_counts_only_their_offers() {
        let buyer = UserId::new();
        let records = vec![
            record(buyer, NegotiationStatus::Accepted, 16_000, Some(16_000)),
            record(buyer, NegotiationStatus::Accepted, 18_000, Some(18_000)),
            record(buyer, NegotiationStatus::Rejected, 10_000, None),
            record(buyer, NegotiationStatus::Expired, 12_000, None),
            record(UserId::new(), NegotiationStatus::Accepted, 19_000, Some(19_000)),
        ];

        let summary = NegotiationSummary::from_records(SummaryScope::Buyer(buyer), &records);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.expired, 1);
        assert!((summary.acceptance_rate - 50.0).abs() < 1e-9);
        // 20% and 10% off
        assert!((summary.average_discount_percentage - 15.0).abs() < 1e-9);
        assert!((summary.average_proposed_price - 14_000.0).abs() < 1e-9);
    }
}
