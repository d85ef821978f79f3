//! Negotiation State Machine.
//!
//! [`NegotiationEngine`] orchestrates every operation on a negotiation:
//! creating offers (with policy auto-accept), seller responses,
//! counter-offers, counter acceptance, buyer withdrawal and expiry.
//!
//! # Concurrency
//!
//! The engine holds no locks. Every status change goes through the store's
//! compare-and-swap keyed on `Pending`, so concurrent responders, the
//! sweeper and eager expiry race to exactly one winner. Losers observe the
//! actual terminal status and report it as a conflict, or as
//! [`NegotiationError::Expired`] when the winner was expiry.
//!
//! # Notifications
//!
//! Notifications are enqueued only after the corresponding write committed,
//! and never block.

use crate::booking::BookingConverter;
use crate::config::EngineConfig;
use crate::metrics::NegotiationMetrics;
use chrono::{DateTime, Utc};
use fare_negotiation_core::environment::Clock;
use fare_negotiation_core::policy::{self, OfferTerms};
use fare_negotiation_core::{
    ActorRole, ConflictReason, ConversionOutcome, ErrorKind, InsertOutcome, Money, Negotiation,
    NegotiationError, NegotiationEvent, NegotiationId, NegotiationStatus, NegotiationStore,
    NegotiationSummary, Notification, NotificationSink, Page, Party, PolicyStore, RejectionReason,
    ResourceLedger, SellerPolicy, SummaryScope, SupersedeOutcome, Transition, TransitionOutcome,
    TripId, TripStatus, UserId, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const AUTO_ACCEPT_MESSAGE: &str = "Auto-accepted based on your pricing preferences.";
const COUNTER_ACCEPTED_MESSAGE: &str = "Counter-offer accepted by passenger";
const WITHDRAWN_MESSAGE: &str = "Withdrawn by passenger";

/// Injected dependencies of the engine.
#[derive(Clone)]
pub struct EngineEnvironment {
    /// Negotiation records
    pub negotiations: Arc<dyn NegotiationStore>,
    /// Trip inventory
    pub ledger: Arc<dyn ResourceLedger>,
    /// Seller auto-accept policies
    pub policies: Arc<dyn PolicyStore>,
    /// Outbound notifications
    pub notifications: Arc<dyn NotificationSink>,
    /// Time source for deadlines and timestamps
    pub clock: Arc<dyn Clock>,
}

impl EngineEnvironment {
    /// Build an environment from one backend that implements all three storage traits.
    #[must_use]
    pub fn from_backend<B>(
        backend: Arc<B>,
        notifications: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        B: NegotiationStore + ResourceLedger + PolicyStore + 'static,
    {
        Self {
            negotiations: backend.clone(),
            ledger: backend.clone(),
            policies: backend,
            notifications,
            clock,
        }
    }
}

impl std::fmt::Debug for EngineEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEnvironment").finish_non_exhaustive()
    }
}

/// A buyer's new offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    /// Trip to bid on
    pub trip_id: TripId,
    /// Passenger making the offer
    pub buyer_id: UserId,
    /// Offered per-seat price
    pub proposed_price: Money,
    /// Seats wanted
    pub seats_requested: u32,
    /// Optional note to the driver
    pub message: Option<String>,
}

/// A seller's answer to a pending offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Accept, optionally at a different price within `[proposed, original]`
    Accept {
        /// Agreed price override; defaults to the proposed price
        final_price: Option<Money>,
    },
    /// Decline
    Reject,
}

/// Result of a bulk respond.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRespondOutcome {
    /// Negotiations attempted
    pub processed: usize,
    /// Negotiations that transitioned
    pub succeeded: usize,
    /// Failures with their error kind
    pub failed: Vec<(NegotiationId, ErrorKind)>,
}

/// The negotiation state machine.
///
/// # Example
///
/// ```ignore
/// let engine = NegotiationEngine::new(env, EngineConfig::default());
///
/// let offer = engine.create_offer(OfferRequest {
///     trip_id,
///     buyer_id,
///     proposed_price: Money::new(16_000),
///     seats_requested: 2,
///     message: None,
/// }).await?;
///
/// let counter = engine.counter_offer(offer.id, seller_id, Money::new(18_000), None).await?;
/// let accepted = engine.accept_counter(counter.id, buyer_id).await?;
/// ```
#[derive(Debug)]
pub struct NegotiationEngine {
    env: EngineEnvironment,
    config: EngineConfig,
    converter: BookingConverter,
}

impl NegotiationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(env: EngineEnvironment, config: EngineConfig) -> Self {
        let converter = BookingConverter::new(
            env.negotiations.clone(),
            env.notifications.clone(),
            env.clock.clone(),
        );
        Self {
            env,
            config,
            converter,
        }
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Create a buyer offer.
    ///
    /// Validates the trip and offer, stores a `Pending` record expiring after
    /// the standard window, then evaluates the seller's auto-accept policy.
    /// An auto-accepted offer is converted into a reservation immediately and
    /// returned `Accepted`; otherwise the seller is notified and the `Pending`
    /// record is returned.
    ///
    /// # Errors
    ///
    /// - `TripNotFound`: no such trip
    /// - `Validation`: trip not scheduled or not negotiable, own trip, bad
    ///   seats or a price not below the advertised one
    /// - `Conflict`: a pending offer or confirmed reservation already exists
    /// - `Store`: persistence failed
    #[tracing::instrument(
        skip(self, request),
        fields(trip_id = %request.trip_id, buyer_id = %request.buyer_id)
    )]
    pub async fn create_offer(
        &self,
        request: OfferRequest,
    ) -> Result<Negotiation, NegotiationError> {
        let trip = self
            .env
            .ledger
            .trip(request.trip_id)
            .await?
            .ok_or(NegotiationError::TripNotFound(request.trip_id))?;

        if trip.status != TripStatus::Scheduled {
            return Err(ValidationError::TripNotScheduled(trip.id).into());
        }
        if !trip.negotiable {
            return Err(ValidationError::TripNotNegotiable(trip.id).into());
        }
        if trip.seller_id == request.buyer_id {
            return Err(ValidationError::OwnTrip.into());
        }
        if request.seats_requested == 0 {
            return Err(ValidationError::NoSeats.into());
        }
        if request.seats_requested > trip.available_seats {
            return Err(ValidationError::SeatsUnavailable {
                requested: request.seats_requested,
                available: trip.available_seats,
            }
            .into());
        }
        if request.proposed_price >= trip.price_per_seat {
            return Err(ValidationError::PriceNotBelowOriginal {
                proposed: request.proposed_price.amount(),
                original: trip.price_per_seat.amount(),
            }
            .into());
        }
        if self
            .env
            .ledger
            .has_confirmed_reservation(trip.id, request.buyer_id)
            .await?
        {
            return Err(NegotiationError::Conflict(
                ConflictReason::ExistingReservation,
            ));
        }

        let now = self.env.clock.now();
        let negotiation = Negotiation {
            id: NegotiationId::new(),
            trip_id: trip.id,
            buyer_id: request.buyer_id,
            seller_id: trip.seller_id,
            original_price: trip.price_per_seat,
            proposed_price: request.proposed_price,
            final_price: None,
            seats_requested: request.seats_requested,
            status: NegotiationStatus::Pending,
            initiated_by: Party::Buyer,
            supersedes: None,
            rejection_reason: None,
            message: request.message,
            response_message: None,
            expires_at: now + self.config.standard_offer_window,
            responded_at: None,
            created_at: now,
        };

        match self.env.negotiations.insert(negotiation.clone()).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::DuplicatePending => {
                tracing::warn!("Rejected duplicate pending offer");
                return Err(NegotiationError::Conflict(ConflictReason::DuplicatePending));
            }
            InsertOutcome::ExistingReservation => {
                tracing::warn!("Rejected offer: buyer booked this trip meanwhile");
                return Err(NegotiationError::Conflict(
                    ConflictReason::ExistingReservation,
                ));
            }
        }

        NegotiationMetrics::record_offer_created();
        tracing::info!(
            negotiation_id = %negotiation.id,
            proposed_price = %negotiation.proposed_price,
            original_price = %negotiation.original_price,
            seats = negotiation.seats_requested,
            "Offer created"
        );

        let policy = self.seller_policy(trip.seller_id).await?;
        let decision = policy::evaluate(
            OfferTerms {
                proposed_price: negotiation.proposed_price,
                original_price: negotiation.original_price,
            },
            &policy,
        );

        if decision.auto_accept {
            let outcome = self
                .converter
                .accept_and_convert(
                    &negotiation,
                    negotiation.proposed_price,
                    Some(AUTO_ACCEPT_MESSAGE.to_string()),
                )
                .await?;

            match outcome {
                ConversionOutcome::Converted {
                    negotiation: accepted,
                    ..
                } => {
                    NegotiationMetrics::record_auto_accept();
                    tracing::info!(
                        negotiation_id = %accepted.id,
                        price_percentage = decision.price_percentage,
                        "Offer auto-accepted by seller policy"
                    );
                    self.notify(
                        accepted.buyer_id,
                        NegotiationEvent::OfferResponded {
                            negotiation_id: accepted.id,
                            trip_id: accepted.trip_id,
                            accepted: true,
                            auto_accepted: true,
                            final_price: accepted.final_price,
                            response_message: accepted.response_message.clone(),
                        },
                    );
                    return Ok(accepted);
                }
                // Seats went elsewhere, the trip closed, or the buyer withdrew:
                // fall through to the manual path with the stored record.
                ConversionOutcome::InsufficientSeats { .. }
                | ConversionOutcome::TripNotScheduled(_)
                | ConversionOutcome::AlreadyTerminal(_) => {
                    let current = self
                        .env
                        .negotiations
                        .get(negotiation.id)
                        .await?
                        .ok_or(NegotiationError::NegotiationNotFound(negotiation.id))?;
                    if !current.is_pending() {
                        return Ok(current);
                    }
                }
            }
        }

        self.notify(
            negotiation.seller_id,
            NegotiationEvent::offer_received(&negotiation),
        );
        Ok(negotiation)
    }

    /// Seller accepts or declines a pending buyer offer.
    ///
    /// Acceptance books the seats in the same atomic step; if the trip no
    /// longer has enough seats nothing changes and `Conflict` is returned.
    ///
    /// # Errors
    ///
    /// - `NegotiationNotFound`: no such negotiation
    /// - `Forbidden`: actor is not the seller
    /// - `Validation`: a counter-offer (use [`Self::accept_counter`]), or a
    ///   final price outside `[proposed, original]`
    /// - `Expired`: deadline passed
    /// - `Conflict`: already resolved, or insufficient seats
    /// - `Store`: persistence failed
    #[tracing::instrument(skip(self, message))]
    pub async fn respond(
        &self,
        negotiation_id: NegotiationId,
        actor: UserId,
        decision: Decision,
        message: Option<String>,
    ) -> Result<Negotiation, NegotiationError> {
        let negotiation = self.load(negotiation_id).await?;
        if negotiation.seller_id != actor {
            return Err(NegotiationError::Forbidden(
                "only the trip's driver can respond to this offer".to_string(),
            ));
        }
        if negotiation.is_counter_offer() {
            return Err(ValidationError::WrongInitiator(
                "counter-offers are answered by the passenger",
            )
            .into());
        }
        self.ensure_open(&negotiation).await?;

        match decision {
            Decision::Accept { final_price } => {
                let final_price = final_price.unwrap_or(negotiation.proposed_price);
                if final_price < negotiation.proposed_price
                    || final_price > negotiation.original_price
                {
                    return Err(ValidationError::FinalPriceOutOfRange {
                        final_price: final_price.amount(),
                        proposed: negotiation.proposed_price.amount(),
                        original: negotiation.original_price.amount(),
                    }
                    .into());
                }

                let accepted = self
                    .convert(&negotiation, final_price, message)
                    .await?;
                self.notify(
                    accepted.buyer_id,
                    NegotiationEvent::OfferResponded {
                        negotiation_id: accepted.id,
                        trip_id: accepted.trip_id,
                        accepted: true,
                        auto_accepted: false,
                        final_price: accepted.final_price,
                        response_message: accepted.response_message.clone(),
                    },
                );
                Ok(accepted)
            }
            Decision::Reject => {
                let now = self.env.clock.now();
                let rejected = self
                    .transition(
                        &negotiation,
                        Transition::reject(RejectionReason::Declined, message, now),
                    )
                    .await?;
                self.notify(
                    rejected.buyer_id,
                    NegotiationEvent::OfferResponded {
                        negotiation_id: rejected.id,
                        trip_id: rejected.trip_id,
                        accepted: false,
                        auto_accepted: false,
                        final_price: None,
                        response_message: rejected.response_message.clone(),
                    },
                );
                Ok(rejected)
            }
        }
    }

    /// Seller answers a pending buyer offer with a counter price.
    ///
    /// The original becomes `Rejected` (reason `Superseded`) and a new
    /// `Pending` record carrying the counter price, pointing back at the
    /// original and expiring after the shorter counter window, is created in
    /// the same atomic step. Returns the new record.
    ///
    /// # Errors
    ///
    /// - `NegotiationNotFound`: no such negotiation
    /// - `Forbidden`: actor is not the seller
    /// - `Validation`: countering a counter-offer, or a counter price not
    ///   strictly between the offered and advertised prices
    /// - `Expired`: deadline passed
    /// - `Conflict`: already resolved
    /// - `Store`: persistence failed
    #[tracing::instrument(skip(self, message))]
    pub async fn counter_offer(
        &self,
        negotiation_id: NegotiationId,
        seller: UserId,
        counter_price: Money,
        message: Option<String>,
    ) -> Result<Negotiation, NegotiationError> {
        let original = self.load(negotiation_id).await?;
        if original.seller_id != seller {
            return Err(NegotiationError::Forbidden(
                "only the trip's driver can make a counter-offer".to_string(),
            ));
        }
        if original.is_counter_offer() {
            return Err(
                ValidationError::WrongInitiator("cannot counter a counter-offer").into(),
            );
        }
        self.ensure_open(&original).await?;

        if counter_price <= original.proposed_price || counter_price >= original.original_price {
            return Err(ValidationError::CounterOutOfRange {
                counter: counter_price.amount(),
                proposed: original.proposed_price.amount(),
                original: original.original_price.amount(),
            }
            .into());
        }

        let now = self.env.clock.now();
        let counter = Negotiation {
            id: NegotiationId::new(),
            trip_id: original.trip_id,
            buyer_id: original.buyer_id,
            seller_id: original.seller_id,
            original_price: original.original_price,
            proposed_price: counter_price,
            final_price: None,
            seats_requested: original.seats_requested,
            status: NegotiationStatus::Pending,
            initiated_by: Party::Seller,
            supersedes: Some(original.id),
            rejection_reason: None,
            message: Some(message.unwrap_or_else(|| format!("Counter-offer: {counter_price}"))),
            response_message: None,
            expires_at: now + self.config.counter_offer_window,
            responded_at: None,
            created_at: now,
        };
        let transition = Transition::reject(
            RejectionReason::Superseded,
            Some(format!("Counter-offer made: {counter_price}")),
            now,
        );

        match self
            .env
            .negotiations
            .supersede_with_counter(original.id, transition, counter)
            .await?
        {
            SupersedeOutcome::Superseded { original, counter } => {
                NegotiationMetrics::record_transition(original.status);
                tracing::info!(
                    original_id = %original.id,
                    counter_id = %counter.id,
                    counter_price = %counter.proposed_price,
                    "Counter-offer created"
                );
                self.notify(
                    counter.buyer_id,
                    NegotiationEvent::CounterOfferReceived {
                        negotiation_id: counter.id,
                        original_negotiation_id: original.id,
                        trip_id: counter.trip_id,
                        counter_price: counter.proposed_price,
                        original_offer: original.proposed_price,
                        message: counter.message.clone(),
                        expires_at: counter.expires_at,
                    },
                );
                Ok(counter)
            }
            SupersedeOutcome::AlreadyTerminal(status) => {
                tracing::warn!(%status, "Counter-offer lost race");
                Err(NegotiationError::already_terminal(original.id, status))
            }
        }
    }

    /// Buyer accepts a seller's counter-offer, booking the seats.
    ///
    /// # Errors
    ///
    /// - `NegotiationNotFound`: no such negotiation
    /// - `Forbidden`: actor is not the buyer
    /// - `Validation`: not a counter-offer
    /// - `Expired`: deadline passed
    /// - `Conflict`: already resolved, or insufficient seats
    /// - `Store`: persistence failed
    #[tracing::instrument(skip(self))]
    pub async fn accept_counter(
        &self,
        negotiation_id: NegotiationId,
        buyer: UserId,
    ) -> Result<Negotiation, NegotiationError> {
        let counter = self.load(negotiation_id).await?;
        if counter.buyer_id != buyer {
            return Err(NegotiationError::Forbidden(
                "only the passenger can accept this counter-offer".to_string(),
            ));
        }
        if !counter.is_counter_offer() {
            return Err(
                ValidationError::WrongInitiator("this is not a counter-offer").into(),
            );
        }
        self.ensure_open(&counter).await?;

        let accepted = self
            .convert(
                &counter,
                counter.proposed_price,
                Some(COUNTER_ACCEPTED_MESSAGE.to_string()),
            )
            .await?;
        self.notify(
            accepted.seller_id,
            NegotiationEvent::CounterOfferAccepted {
                negotiation_id: accepted.id,
                trip_id: accepted.trip_id,
                buyer_id: accepted.buyer_id,
                final_price: accepted.proposed_price,
            },
        );
        Ok(accepted)
    }

    /// Buyer withdraws a pending negotiation.
    ///
    /// The record is kept, as `Rejected` with reason `Withdrawn`.
    ///
    /// # Errors
    ///
    /// - `NegotiationNotFound`: no such negotiation
    /// - `Forbidden`: actor is not the buyer
    /// - `Expired`: deadline passed
    /// - `Conflict`: already resolved
    /// - `Store`: persistence failed
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        negotiation_id: NegotiationId,
        buyer: UserId,
    ) -> Result<Negotiation, NegotiationError> {
        let negotiation = self.load(negotiation_id).await?;
        if negotiation.buyer_id != buyer {
            return Err(NegotiationError::Forbidden(
                "only the passenger can cancel this offer".to_string(),
            ));
        }
        self.ensure_open(&negotiation).await?;

        let now = self.env.clock.now();
        let withdrawn = self
            .transition(
                &negotiation,
                Transition::reject(
                    RejectionReason::Withdrawn,
                    Some(WITHDRAWN_MESSAGE.to_string()),
                    now,
                ),
            )
            .await?;
        self.notify(
            withdrawn.seller_id,
            NegotiationEvent::OfferWithdrawn {
                negotiation_id: withdrawn.id,
                trip_id: withdrawn.trip_id,
                buyer_id: withdrawn.buyer_id,
            },
        );
        Ok(withdrawn)
    }

    /// Seller applies the same decision to many offers.
    ///
    /// Each negotiation is handled independently; one failure never stops
    /// the others.
    #[tracing::instrument(skip(self, negotiation_ids, message), fields(count = negotiation_ids.len()))]
    pub async fn bulk_respond(
        &self,
        seller: UserId,
        negotiation_ids: &[NegotiationId],
        decision: Decision,
        message: Option<String>,
    ) -> BulkRespondOutcome {
        let mut outcome = BulkRespondOutcome::default();
        for &id in negotiation_ids {
            outcome.processed += 1;
            match self.respond(id, seller, decision, message.clone()).await {
                Ok(_) => outcome.succeeded += 1,
                Err(e) => {
                    tracing::debug!(negotiation_id = %id, error = %e, "Bulk respond item failed");
                    outcome.failed.push((id, e.kind()));
                }
            }
        }
        tracing::info!(
            processed = outcome.processed,
            succeeded = outcome.succeeded,
            failed = outcome.failed.len(),
            "Bulk respond completed"
        );
        outcome
    }

    /// Expire every pending negotiation whose deadline has passed.
    ///
    /// Works through the backlog in batches of `sweep_batch_size`. A record
    /// that fails to transition is logged and left for the next pass;
    /// records another writer already resolved are skipped. Returns how many
    /// records this call moved to `Expired`.
    ///
    /// # Errors
    ///
    /// Returns `Store` only if listing lapsed records fails.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64, NegotiationError> {
        let now = self.env.clock.now();
        let batch_size = self.config.sweep_batch_size;
        let mut expired = 0;

        loop {
            let batch = self
                .env
                .negotiations
                .lapsed_pending(now, batch_size)
                .await?;
            let fetched = batch.len();
            let mut resolved = 0;

            for id in batch {
                match self.expire(id, now).await {
                    Ok(TransitionOutcome::Applied(_)) => {
                        expired += 1;
                        resolved += 1;
                    }
                    Ok(TransitionOutcome::AlreadyTerminal(_)) => resolved += 1,
                    Err(e) => {
                        NegotiationMetrics::record_sweep_failure();
                        tracing::error!(negotiation_id = %id, error = %e, "Failed to expire negotiation");
                    }
                }
            }

            if fetched < batch_size as usize || resolved == 0 {
                break;
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expiry sweep completed");
        }
        Ok(expired)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// A negotiation, visible to its buyer and seller only.
    ///
    /// # Errors
    ///
    /// - `NegotiationNotFound`: no such negotiation
    /// - `Forbidden`: requester is not a party
    /// - `Store`: persistence failed
    pub async fn get(
        &self,
        negotiation_id: NegotiationId,
        requester: UserId,
    ) -> Result<Negotiation, NegotiationError> {
        let negotiation = self.load(negotiation_id).await?;
        if !negotiation.is_party(requester) {
            return Err(NegotiationError::Forbidden(
                "not a party to this negotiation".to_string(),
            ));
        }
        Ok(negotiation)
    }

    /// The chain of records leading to `negotiation_id`, oldest first.
    ///
    /// Follows `supersedes` pointers back to the buyer's first offer.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get`].
    pub async fn thread(
        &self,
        negotiation_id: NegotiationId,
        requester: UserId,
    ) -> Result<Vec<Negotiation>, NegotiationError> {
        let mut current = self.get(negotiation_id, requester).await?;
        let mut chain = Vec::new();
        while let Some(previous) = current.supersedes {
            let next = self.load(previous).await?;
            chain.push(std::mem::replace(&mut current, next));
        }
        chain.push(current);
        chain.reverse();
        Ok(chain)
    }

    /// Every negotiation on a trip, newest first. Seller only.
    ///
    /// # Errors
    ///
    /// - `TripNotFound`: no such trip
    /// - `Forbidden`: requester is not the trip's seller
    /// - `Store`: persistence failed
    pub async fn list_for_trip(
        &self,
        trip_id: TripId,
        requester: UserId,
    ) -> Result<Vec<Negotiation>, NegotiationError> {
        let trip = self
            .env
            .ledger
            .trip(trip_id)
            .await?
            .ok_or(NegotiationError::TripNotFound(trip_id))?;
        if trip.seller_id != requester {
            return Err(NegotiationError::Forbidden(
                "only the trip's driver can list its negotiations".to_string(),
            ));
        }
        Ok(self.env.negotiations.list_by_trip(trip_id).await?)
    }

    /// Offers an actor made (as buyer) or received (as seller), newest first.
    ///
    /// `page` defaults to the configured page size and is capped at the
    /// configured maximum.
    ///
    /// # Errors
    ///
    /// Returns `Store` if persistence fails.
    pub async fn list_for_actor(
        &self,
        actor: UserId,
        role: ActorRole,
        status: Option<NegotiationStatus>,
        page: Option<Page>,
    ) -> Result<Vec<Negotiation>, NegotiationError> {
        let page = page
            .unwrap_or(Page::new(0, self.config.default_page_size))
            .capped(self.config.max_page_size);
        Ok(self
            .env
            .negotiations
            .list_by_actor(actor, role, status, page)
            .await?)
    }

    /// Statistics for a buyer, seller or trip.
    ///
    /// # Errors
    ///
    /// Returns `Store` if persistence fails.
    pub async fn summary(&self, scope: SummaryScope) -> Result<NegotiationSummary, NegotiationError> {
        Ok(self.env.negotiations.summarize(scope).await?)
    }

    // ========================================================================
    // Seller policy
    // ========================================================================

    /// Store a seller's auto-accept policy.
    ///
    /// # Errors
    ///
    /// - `Validation`: thresholds out of range
    /// - `Store`: persistence failed
    #[tracing::instrument(skip(self))]
    pub async fn set_seller_policy(
        &self,
        seller: UserId,
        policy: SellerPolicy,
    ) -> Result<SellerPolicy, NegotiationError> {
        policy.validate()?;
        self.env.policies.save_seller_policy(seller, policy).await?;
        tracing::info!(
            enabled = policy.enabled,
            min_price_percentage = policy.min_price_percentage,
            max_discount = %policy.max_discount,
            "Seller policy updated"
        );
        Ok(policy)
    }

    /// A seller's policy, or the disabled default if none is stored.
    ///
    /// # Errors
    ///
    /// Returns `Store` if persistence fails.
    pub async fn seller_policy(&self, seller: UserId) -> Result<SellerPolicy, NegotiationError> {
        Ok(self
            .env
            .policies
            .seller_policy(seller)
            .await?
            .unwrap_or_default())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load(&self, id: NegotiationId) -> Result<Negotiation, NegotiationError> {
        self.env
            .negotiations
            .get(id)
            .await?
            .ok_or(NegotiationError::NegotiationNotFound(id))
    }

    /// Fail unless the record is pending and within its deadline.
    ///
    /// A lapsed pending record is expired on the spot, as the sweeper would.
    async fn ensure_open(&self, negotiation: &Negotiation) -> Result<(), NegotiationError> {
        if negotiation.status.is_terminal() {
            return Err(NegotiationError::already_terminal(
                negotiation.id,
                negotiation.status,
            ));
        }
        let now = self.env.clock.now();
        if negotiation.has_lapsed(now) {
            return match self.expire(negotiation.id, now).await? {
                TransitionOutcome::Applied(_) => Err(NegotiationError::Expired(negotiation.id)),
                TransitionOutcome::AlreadyTerminal(status) => {
                    Err(NegotiationError::already_terminal(negotiation.id, status))
                }
            };
        }
        Ok(())
    }

    async fn expire(
        &self,
        id: NegotiationId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, NegotiationError> {
        let outcome = self
            .env
            .negotiations
            .conditional_transition(id, NegotiationStatus::Pending, Transition::expire(now))
            .await?;

        if let TransitionOutcome::Applied(expired) = &outcome {
            NegotiationMetrics::record_transition(expired.status);
            tracing::info!(negotiation_id = %expired.id, "Negotiation expired");
            let event = NegotiationEvent::OfferExpired {
                negotiation_id: expired.id,
                trip_id: expired.trip_id,
            };
            for recipient in [expired.buyer_id, expired.seller_id] {
                self.notify(recipient, event.clone());
            }
        }
        Ok(outcome)
    }

    /// Apply a non-booking terminal transition to a pending record.
    async fn transition(
        &self,
        negotiation: &Negotiation,
        transition: Transition,
    ) -> Result<Negotiation, NegotiationError> {
        match self
            .env
            .negotiations
            .conditional_transition(negotiation.id, NegotiationStatus::Pending, transition)
            .await?
        {
            TransitionOutcome::Applied(updated) => {
                NegotiationMetrics::record_transition(updated.status);
                tracing::info!(
                    negotiation_id = %updated.id,
                    status = %updated.status,
                    reason = updated.rejection_reason.map(|r| r.as_str()),
                    "Negotiation resolved"
                );
                Ok(updated)
            }
            TransitionOutcome::AlreadyTerminal(status) => {
                tracing::warn!(negotiation_id = %negotiation.id, %status, "Transition lost race");
                Err(NegotiationError::already_terminal(negotiation.id, status))
            }
        }
    }

    /// Accept and book, mapping non-converted outcomes to errors.
    async fn convert(
        &self,
        negotiation: &Negotiation,
        final_price: Money,
        response_message: Option<String>,
    ) -> Result<Negotiation, NegotiationError> {
        match self
            .converter
            .accept_and_convert(negotiation, final_price, response_message)
            .await?
        {
            ConversionOutcome::Converted {
                negotiation: accepted,
                ..
            } => Ok(accepted),
            ConversionOutcome::InsufficientSeats {
                requested,
                available,
            } => Err(NegotiationError::Conflict(
                ConflictReason::InsufficientSeats {
                    requested,
                    available,
                },
            )),
            ConversionOutcome::TripNotScheduled(_) => {
                Err(ValidationError::TripNotScheduled(negotiation.trip_id).into())
            }
            ConversionOutcome::AlreadyTerminal(status) => {
                Err(NegotiationError::already_terminal(negotiation.id, status))
            }
        }
    }

    fn notify(&self, recipient: UserId, event: NegotiationEvent) {
        tracing::debug!(%recipient, event = event.name(), "Enqueueing notification");
        self.env
            .notifications
            .enqueue(Notification::new(recipient, event, self.env.clock.now()));
    }
}
