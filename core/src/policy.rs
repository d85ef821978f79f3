//! Seller auto-accept policy and its evaluator.
//!
//! [`evaluate`] is a pure function: the seller's configuration is passed in
//! explicitly and nothing is read from ambient state.

use crate::error::ValidationError;
use crate::types::Money;
use serde::{Deserialize, Serialize};

/// Lowest allowed `min_price_percentage`.
pub const MIN_POLICY_PERCENTAGE: u8 = 50;

/// Highest allowed `min_price_percentage`.
pub const MAX_POLICY_PERCENTAGE: u8 = 100;

/// A seller's auto-accept thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerPolicy {
    /// Whether auto-accept is on
    pub enabled: bool,
    /// Lowest acceptable offer as a percentage of the advertised price (50..=100)
    pub min_price_percentage: u8,
    /// Largest acceptable per-seat discount
    pub max_discount: Money,
}

impl SellerPolicy {
    /// Build a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PolicyPercentage`] when
    /// `min_price_percentage` is outside 50..=100.
    pub fn new(
        enabled: bool,
        min_price_percentage: u8,
        max_discount: Money,
    ) -> Result<Self, ValidationError> {
        let policy = Self {
            enabled,
            min_price_percentage,
            max_discount,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check the thresholds are in range.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PolicyPercentage`] when out of range.
    pub const fn validate(&self) -> Result<(), ValidationError> {
        if self.min_price_percentage < MIN_POLICY_PERCENTAGE
            || self.min_price_percentage > MAX_POLICY_PERCENTAGE
        {
            return Err(ValidationError::PolicyPercentage(self.min_price_percentage));
        }
        Ok(())
    }
}

impl Default for SellerPolicy {
    /// Disabled, 80%, 10 000 discount cap.
    fn default() -> Self {
        Self {
            enabled: false,
            min_price_percentage: 80,
            max_discount: Money::new(10_000),
        }
    }
}

/// The two prices a policy decision depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OfferTerms {
    /// Offered per-seat price
    pub proposed_price: Money,
    /// Advertised per-seat price
    pub original_price: Money,
}

/// Outcome of a policy evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcceptDecision {
    /// Whether the offer is accepted without seller intervention
    pub auto_accept: bool,
    /// `proposed / original × 100`
    pub price_percentage: f64,
    /// `original - proposed` (zero if the offer is not a discount)
    pub discount: Money,
}

/// Decide whether an offer is auto-accepted.
///
/// Accepts iff the policy is enabled, the offer is at least
/// `min_price_percentage` percent of the advertised price, and the discount
/// does not exceed `max_discount`. The percentage threshold is compared with
/// integer cross-multiplication so boundary offers are decided exactly.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(offer: OfferTerms, policy: &SellerPolicy) -> AcceptDecision {
    let proposed = offer.proposed_price.amount();
    let original = offer.original_price.amount();

    let discount = offer
        .original_price
        .checked_sub(offer.proposed_price)
        .unwrap_or(Money::ZERO);

    let price_percentage = if original == 0 {
        0.0
    } else {
        proposed as f64 / original as f64 * 100.0
    };

    let meets_percentage = original > 0
        && u128::from(proposed) * 100
            >= u128::from(policy.min_price_percentage) * u128::from(original);

    AcceptDecision {
        auto_accept: policy.enabled && meets_percentage && discount <= policy.max_discount,
        price_percentage,
        discount,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enabled(min_pct: u8, max_discount: u64) -> SellerPolicy {
        SellerPolicy::new(true, min_pct, Money::new(max_discount)).unwrap()
    }

    fn terms(proposed: u64, original: u64) -> OfferTerms {
        OfferTerms {
            proposed_price: Money::new(proposed),
            original_price: Money::new(original),
        }
    }

    #[test]
    fn accepts_85_percent_offer() {
        let decision = evaluate(terms(17_000, 20_000), &enabled(80, 10_000));
        assert!(decision.auto_accept);
        assert!((decision.price_percentage - 85.0).abs() < f64::EPSILON);
        assert_eq!(decision.discount, Money::new(3_000));
    }

    #[test]
    fn rejects_75_percent_offer() {
        let decision = evaluate(terms(15_000, 20_000), &enabled(80, 10_000));
        assert!(!decision.auto_accept);
    }

    #[test]
    fn boundary_percentage_is_inclusive() {
        assert!(evaluate(terms(16_000, 20_000), &enabled(80, 10_000)).auto_accept);
        assert!(!evaluate(terms(15_999, 20_000), &enabled(80, 10_000)).auto_accept);
    }

    #[test]
    fn discount_cap_applies() {
        // 90% but 10 000 off a 100 000 fare exceeds a 5 000 cap
        assert!(!evaluate(terms(90_000, 100_000), &enabled(80, 5_000)).auto_accept);
        assert!(evaluate(terms(90_000, 100_000), &enabled(80, 10_000)).auto_accept);
    }

    #[test]
    fn disabled_policy_never_accepts() {
        let policy = SellerPolicy {
            enabled: false,
            ..enabled(50, u64::MAX)
        };
        assert!(!evaluate(terms(19_999, 20_000), &policy).auto_accept);
    }

    #[test]
    fn zero_original_price_never_accepts() {
        assert!(!evaluate(terms(0, 0), &enabled(50, 10_000)).auto_accept);
    }

    #[test]
    fn policy_percentage_bounds() {
        assert!(SellerPolicy::new(true, 49, Money::ZERO).is_err());
        assert!(SellerPolicy::new(true, 101, Money::ZERO).is_err());
        assert!(SellerPolicy::new(true, 50, Money::ZERO).is_ok());
        assert!(SellerPolicy::new(true, 100, Money::ZERO).is_ok());
    }

    #[test]
    fn default_policy_is_disabled() {
        let policy = SellerPolicy::default();
        assert!(!policy.enabled);
        assert_eq!(policy.min_price_percentage, 80);
        assert_eq!(policy.max_discount, Money::new(10_000));
    }

    proptest! {
        #[test]
        fn decision_matches_definition(
            original in 1u64..1_000_000,
            proposed_ratio in 0u64..=100,
            min_pct in 50u8..=100,
            max_discount in 0u64..1_000_000,
        ) {
            let proposed = original * proposed_ratio / 100;
            let policy = enabled(min_pct, max_discount);
            let decision = evaluate(terms(proposed, original), &policy);

            let expected = proposed * 100 >= u64::from(min_pct) * original
                && original - proposed <= max_discount;
            prop_assert_eq!(decision.auto_accept, expected);
        }

        #[test]
        fn evaluation_is_deterministic(proposed in 0u64..100_000, original in 1u64..100_000) {
            let policy = enabled(80, 10_000);
            prop_assert_eq!(
                evaluate(terms(proposed, original), &policy),
                evaluate(terms(proposed, original), &policy)
            );
        }
    }
}
