//! Integration tests for the negotiation lifecycle
//!
//! Drives the engine end to end against the in-memory marketplace: the
//! offer → counter → accept-counter scenario, policy auto-accept and the
//! counter-offer price bounds.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::Duration;
use fare_negotiation_core::environment::Clock;
use fare_negotiation_core::{
    ErrorKind, Money, NegotiationError, NegotiationStatus, Party, RejectionReason, SellerPolicy,
    TripId, TripStatus, UserId, ValidationError,
};
use fare_negotiation_runtime::{EngineConfig, EngineEnvironment, NegotiationEngine, OfferRequest};
use fare_negotiation_testing::{
    InMemoryMarketplace, RecordingNotificationSink, fixtures, helpers, properties, test_clock,
};
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Marketplace {
    market: Arc<InMemoryMarketplace>,
    sink: RecordingNotificationSink,
    engine: NegotiationEngine,
    seller: UserId,
    trip: TripId,
}

fn marketplace(price: u64, seats: u32) -> Marketplace {
    helpers::init_tracing();
    let market = Arc::new(InMemoryMarketplace::new());
    let sink = RecordingNotificationSink::new();
    let seller = UserId::new();
    let trip = market.add_trip(fixtures::scheduled_trip(seller, price, seats));
    let engine = NegotiationEngine::new(
        EngineEnvironment::from_backend(
            market.clone(),
            Arc::new(sink.clone()),
            Arc::new(test_clock()),
        ),
        EngineConfig::default(),
    );
    Marketplace {
        market,
        sink,
        engine,
        seller,
        trip,
    }
}

fn offer(trip: TripId, buyer: UserId, price: u64, seats: u32) -> OfferRequest {
    OfferRequest {
        trip_id: trip,
        buyer_id: buyer,
        proposed_price: Money::new(price),
        seats_requested: seats,
        message: Some("Would you take less?".to_string()),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn offer_counter_accept_counter_books_seats() {
    let m = marketplace(20_000, 3);
    let buyer = UserId::new();
    let now = test_clock().now();

    let original = m
        .engine
        .create_offer(offer(m.trip, buyer, 16_000, 2))
        .await
        .unwrap();
    assert_eq!(original.status, NegotiationStatus::Pending);
    assert_eq!(original.expires_at, now + Duration::hours(24));

    let counter = m
        .engine
        .counter_offer(original.id, m.seller, Money::new(18_000), None)
        .await
        .unwrap();
    assert_eq!(counter.status, NegotiationStatus::Pending);
    assert_eq!(counter.initiated_by, Party::Seller);
    assert_eq!(counter.buyer_id, buyer);
    assert_eq!(counter.expires_at, now + Duration::hours(12));

    let superseded = m.market.negotiation(original.id).unwrap();
    assert_eq!(superseded.status, NegotiationStatus::Rejected);
    assert_eq!(superseded.rejection_reason, Some(RejectionReason::Superseded));

    let accepted = m.engine.accept_counter(counter.id, buyer).await.unwrap();
    assert_eq!(accepted.status, NegotiationStatus::Accepted);
    assert_eq!(accepted.final_price, Some(Money::new(18_000)));
    assert_eq!(
        accepted.response_message.as_deref(),
        Some("Counter-offer accepted by passenger")
    );

    let reservations = m.market.reservations_for(counter.id);
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].seats_booked, 2);
    assert_eq!(reservations[0].total_price, Money::new(36_000));
    assert_eq!(m.market.trip_snapshot(m.trip).unwrap().available_seats, 1);

    assert_eq!(
        m.sink.event_names_for(m.seller),
        vec!["offer_received", "booking_confirmed", "counter_offer_accepted"]
    );
    assert_eq!(
        m.sink.event_names_for(buyer),
        vec!["counter_offer_received", "booking_confirmed"]
    );

    let thread = m.engine.thread(accepted.id, m.seller).await.unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].id, original.id);
}

#[tokio::test]
async fn auto_accept_policy_threshold() {
    let m = marketplace(20_000, 5);
    m.engine
        .set_seller_policy(
            m.seller,
            SellerPolicy::new(true, 80, Money::new(10_000)).unwrap(),
        )
        .await
        .unwrap();

    // 85%, discount 3 000
    let accepted = m
        .engine
        .create_offer(offer(m.trip, UserId::new(), 17_000, 1))
        .await
        .unwrap();
    assert_eq!(accepted.status, NegotiationStatus::Accepted);
    assert_eq!(m.market.reservations_for(accepted.id).len(), 1);

    // 75%
    let pending = m
        .engine
        .create_offer(offer(m.trip, UserId::new(), 15_000, 1))
        .await
        .unwrap();
    assert_eq!(pending.status, NegotiationStatus::Pending);
    assert!(m.market.reservations_for(pending.id).is_empty());
}

#[tokio::test]
async fn auto_accept_filling_last_seats_marks_trip_full() {
    let m = marketplace(20_000, 2);
    m.engine
        .set_seller_policy(m.seller, SellerPolicy::new(true, 50, Money::new(10_000)).unwrap())
        .await
        .unwrap();

    m.engine
        .create_offer(offer(m.trip, UserId::new(), 19_000, 2))
        .await
        .unwrap();

    let trip = m.market.trip_snapshot(m.trip).unwrap();
    assert_eq!(trip.available_seats, 0);
    assert_eq!(trip.status, TripStatus::Full);

    let closed = m
        .engine
        .create_offer(offer(m.trip, UserId::new(), 19_000, 1))
        .await
        .unwrap_err();
    assert_eq!(closed.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn counter_equal_to_either_bound_is_rejected() {
    let m = marketplace(20_000, 3);
    let original = m
        .engine
        .create_offer(offer(m.trip, UserId::new(), 16_000, 1))
        .await
        .unwrap();

    for bound in [16_000, 20_000] {
        let err = m
            .engine
            .counter_offer(original.id, m.seller, Money::new(bound), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NegotiationError::Validation(ValidationError::CounterOutOfRange { .. })
        ));
    }

    // Rejected counters leave the original untouched
    assert!(m.market.negotiation(original.id).unwrap().is_pending());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn counter_accepted_iff_strictly_between(
        (proposed, original) in properties::discounted_prices(),
        counter in 0u64..1_000_001,
    ) {
        let m = marketplace(original.amount(), 3);
        let offered = tokio_test::block_on(
            m.engine.create_offer(offer(m.trip, UserId::new(), proposed.amount(), 1)),
        )
        .unwrap();

        let result = tokio_test::block_on(
            m.engine.counter_offer(offered.id, m.seller, Money::new(counter), None),
        );

        let in_range = counter > proposed.amount() && counter < original.amount();
        prop_assert_eq!(result.is_ok(), in_range);
        prop_assert_eq!(
            m.market.negotiation(offered.id).unwrap().is_pending(),
            !in_range
        );
    }
}
