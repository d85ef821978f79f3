//! `NegotiationStore` over the `negotiations` table.

use crate::ledger::{available_seats, lock_trip, reservation_exists, take_seats};
use crate::{
    NEGOTIATION_COLUMNS, ONE_PENDING_INDEX, PostgresMarketplace, db_err, from_count,
    negotiation_from_row, not_found, to_i32,
};
use chrono::{DateTime, Utc};
use fare_negotiation_core::{
    ActorRole, BookingPlan, ConversionOutcome, InsertOutcome, Money, Negotiation, NegotiationId,
    NegotiationStatus, NegotiationStore, NegotiationSummary, Page, StoreError, StoreFuture,
    SummaryScope, SupersedeOutcome, Transition, TransitionOutcome, TripId, TripStatus, UserId,
};
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

/// Compare-and-swap on `status`. `None` when the record was not in `expected`.
async fn apply_transition<'e, E>(
    executor: E,
    id: NegotiationId,
    expected: NegotiationStatus,
    transition: &Transition,
) -> Result<Option<Negotiation>, StoreError>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        r"
        UPDATE negotiations
        SET status = $3,
            final_price = $4,
            rejection_reason = $5,
            response_message = $6,
            responded_at = $7
        WHERE id = $1 AND status = $2
        RETURNING {NEGOTIATION_COLUMNS}
        "
    );
    let row = sqlx::query(&sql)
        .bind(*id.as_uuid())
        .bind(expected.as_str())
        .bind(transition.status.as_str())
        .bind(transition.final_price.map(Money::to_i64).transpose()?)
        .bind(transition.rejection_reason.map(|r| r.as_str()))
        .bind(transition.response_message.as_deref())
        .bind(transition.responded_at)
        .fetch_optional(executor)
        .await
        .map_err(db_err)?;

    row.as_ref().map(negotiation_from_row).transpose()
}

async fn current_status<'e, E>(
    executor: E,
    id: NegotiationId,
) -> Result<Option<NegotiationStatus>, StoreError>
where
    E: PgExecutor<'e>,
{
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM negotiations WHERE id = $1")
        .bind(*id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(db_err)?;

    status.as_deref().map(NegotiationStatus::parse).transpose()
}

/// Insert a record, reporting a hit on the one-pending index as a duplicate.
async fn insert_row<'e, E>(executor: E, n: &Negotiation) -> Result<InsertOutcome, StoreError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r"
        INSERT INTO negotiations (
            id, trip_id, buyer_id, seller_id, original_price, proposed_price, final_price,
            seats_requested, status, initiated_by, supersedes, rejection_reason, message,
            response_message, expires_at, responded_at, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ",
    )
    .bind(*n.id.as_uuid())
    .bind(*n.trip_id.as_uuid())
    .bind(*n.buyer_id.as_uuid())
    .bind(*n.seller_id.as_uuid())
    .bind(n.original_price.to_i64()?)
    .bind(n.proposed_price.to_i64()?)
    .bind(n.final_price.map(Money::to_i64).transpose()?)
    .bind(to_i32(n.seats_requested)?)
    .bind(n.status.as_str())
    .bind(n.initiated_by.as_str())
    .bind(n.supersedes.map(|id| *id.as_uuid()))
    .bind(n.rejection_reason.map(|r| r.as_str()))
    .bind(n.message.as_deref())
    .bind(n.response_message.as_deref())
    .bind(n.expires_at)
    .bind(n.responded_at)
    .bind(n.created_at)
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(sqlx::Error::Database(db_error))
            if db_error.is_unique_violation()
                && db_error.constraint() == Some(ONE_PENDING_INDEX) =>
        {
            Ok(InsertOutcome::DuplicatePending)
        }
        Err(e) => Err(db_err(e)),
    }
}

impl NegotiationStore for PostgresMarketplace {
    fn insert(&self, negotiation: Negotiation) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let trip_id = negotiation.trip_id;
            let buyer_id = negotiation.buyer_id;
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            if lock_trip(&mut *tx, trip_id).await?.is_none() {
                tx.rollback().await.map_err(db_err)?;
                return Err(not_found("trip", trip_id));
            }
            if reservation_exists(&mut *tx, trip_id, buyer_id).await? {
                tx.rollback().await.map_err(db_err)?;
                tracing::debug!(
                    %trip_id,
                    %buyer_id,
                    "Insert blocked by confirmed reservation"
                );
                return Ok(InsertOutcome::ExistingReservation);
            }

            let outcome = insert_row(&mut *tx, &negotiation).await?;
            if outcome == InsertOutcome::DuplicatePending {
                tx.rollback().await.map_err(db_err)?;
                tracing::debug!(
                    %trip_id,
                    %buyer_id,
                    "Insert blocked by existing pending negotiation"
                );
                return Ok(outcome);
            }

            tx.commit().await.map_err(db_err)?;
            Ok(outcome)
        })
    }

    fn get(&self, id: NegotiationId) -> StoreFuture<'_, Option<Negotiation>> {
        Box::pin(async move {
            let sql = format!("SELECT {NEGOTIATION_COLUMNS} FROM negotiations WHERE id = $1");
            let row = sqlx::query(&sql)
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            row.as_ref().map(negotiation_from_row).transpose()
        })
    }

    fn list_by_trip(&self, trip_id: TripId) -> StoreFuture<'_, Vec<Negotiation>> {
        Box::pin(async move {
            let sql = format!(
                r"
                SELECT {NEGOTIATION_COLUMNS}
                FROM negotiations
                WHERE trip_id = $1
                ORDER BY created_at DESC, seq DESC
                "
            );
            let rows = sqlx::query(&sql)
                .bind(*trip_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.iter().map(negotiation_from_row).collect()
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
            let column = match role {
                ActorRole::Buyer => "buyer_id",
                ActorRole::Seller => "seller_id",
            };
            let sql = format!(
                r"
                SELECT {NEGOTIATION_COLUMNS}
                FROM negotiations
                WHERE {column} = $1 AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY created_at DESC, seq DESC
                OFFSET $3
                LIMIT $4
                "
            );
            let rows = sqlx::query(&sql)
                .bind(*actor.as_uuid())
                .bind(status.map(|s| s.as_str()))
                .bind(i64::from(page.offset))
                .bind(i64::from(page.limit))
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.iter().map(negotiation_from_row).collect()
        })
    }

    fn conditional_transition(
        &self,
        id: NegotiationId,
        expected: NegotiationStatus,
        transition: Transition,
    ) -> StoreFuture<'_, TransitionOutcome> {
        Box::pin(async move {
            if let Some(updated) = apply_transition(&self.pool, id, expected, &transition).await? {
                return Ok(TransitionOutcome::Applied(updated));
            }
            match current_status(&self.pool, id).await? {
                Some(status) => Ok(TransitionOutcome::AlreadyTerminal(status)),
                None => Err(not_found("negotiation", id)),
            }
        })
    }

    fn supersede_with_counter(
        &self,
        original_id: NegotiationId,
        transition: Transition,
        counter: Negotiation,
    ) -> StoreFuture<'_, SupersedeOutcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            let Some(original) = apply_transition(
                &mut *tx,
                original_id,
                NegotiationStatus::Pending,
                &transition,
            )
            .await?
            else {
                let status = current_status(&mut *tx, original_id).await?;
                tx.rollback().await.map_err(db_err)?;
                return match status {
                    Some(status) => Ok(SupersedeOutcome::AlreadyTerminal(status)),
                    None => Err(not_found("negotiation", original_id)),
                };
            };

            if insert_row(&mut *tx, &counter).await? == InsertOutcome::DuplicatePending {
                tx.rollback().await.map_err(db_err)?;
                return Err(StoreError::Database(format!(
                    "counter-offer {} collides with another pending negotiation",
                    counter.id
                )));
            }

            tx.commit().await.map_err(db_err)?;
            Ok(SupersedeOutcome::Superseded { original, counter })
        })
    }

    fn accept_and_book(
        &self,
        id: NegotiationId,
        plan: BookingPlan,
    ) -> StoreFuture<'_, ConversionOutcome> {
        Box::pin(async move {
            let trip_id = plan.reservation.trip_id;
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            let Some(trip_status) = lock_trip(&mut *tx, trip_id).await? else {
                tx.rollback().await.map_err(db_err)?;
                return Err(not_found("trip", trip_id));
            };

            let Some(negotiation) =
                apply_transition(&mut *tx, id, NegotiationStatus::Pending, &plan.transition)
                    .await?
            else {
                let status = current_status(&mut *tx, id).await?;
                tx.rollback().await.map_err(db_err)?;
                return match status {
                    Some(status) => Ok(ConversionOutcome::AlreadyTerminal(status)),
                    None => Err(not_found("negotiation", id)),
                };
            };

            if trip_status != TripStatus::Scheduled {
                tx.rollback().await.map_err(db_err)?;
                tracing::debug!(
                    negotiation_id = %id,
                    ?trip_status,
                    "Conversion rolled back: trip no longer scheduled"
                );
                return Ok(ConversionOutcome::TripNotScheduled(trip_status));
            }

            let reservation = plan.reservation;
            let requested = reservation.seats_booked;
            let Some(remaining_seats) = take_seats(&mut *tx, reservation.trip_id, requested).await?
            else {
                let available = available_seats(&mut *tx, reservation.trip_id).await?;
                tx.rollback().await.map_err(db_err)?;
                return match available {
                    Some(available) => {
                        tracing::debug!(
                            negotiation_id = %id,
                            requested,
                            available,
                            "Conversion rolled back: insufficient seats"
                        );
                        Ok(ConversionOutcome::InsufficientSeats {
                            requested,
                            available,
                        })
                    }
                    None => Err(not_found("trip", reservation.trip_id)),
                };
            };

            sqlx::query(
                r"
                INSERT INTO reservations (
                    id, negotiation_id, trip_id, buyer_id, seats_booked, total_price, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(*reservation.id.as_uuid())
            .bind(*reservation.negotiation_id.as_uuid())
            .bind(*reservation.trip_id.as_uuid())
            .bind(*reservation.buyer_id.as_uuid())
            .bind(to_i32(reservation.seats_booked)?)
            .bind(reservation.total_price.to_i64()?)
            .bind(reservation.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            tx.commit().await.map_err(db_err)?;

            Ok(ConversionOutcome::Converted {
                negotiation,
                reservation,
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
            let ids: Vec<Uuid> = sqlx::query_scalar(
                r"
                SELECT id
                FROM negotiations
                WHERE status = 'pending' AND expires_at <= $1
                ORDER BY expires_at ASC
                LIMIT $2
                ",
            )
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            Ok(ids.into_iter().map(NegotiationId::from_uuid).collect())
        })
    }

    fn summarize(&self, scope: SummaryScope) -> StoreFuture<'_, NegotiationSummary> {
        Box::pin(async move {
            let (column, id) = match scope {
                SummaryScope::Buyer(user) => ("buyer_id", *user.as_uuid()),
                SummaryScope::Seller(user) => ("seller_id", *user.as_uuid()),
                SummaryScope::Trip(trip) => ("trip_id", *trip.as_uuid()),
            };
            let sql = format!(
                r"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                    COUNT(*) FILTER (WHERE status = 'accepted') AS accepted,
                    COUNT(*) FILTER (WHERE status = 'rejected') AS rejected,
                    COUNT(*) FILTER (WHERE status = 'expired') AS expired,
                    COALESCE(
                        SUM(
                            GREATEST(original_price - COALESCE(final_price, 0), 0)::DOUBLE PRECISION
                                / original_price * 100
                        ) FILTER (WHERE status = 'accepted' AND original_price > 0),
                        0
                    )::DOUBLE PRECISION AS discount_sum,
                    COALESCE(SUM(proposed_price), 0)::BIGINT AS proposed_sum
                FROM negotiations
                WHERE {column} = $1
                "
            );
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

            let proposed_sum = from_count(row.get("proposed_sum"))?;
            Ok(NegotiationSummary::from_counts(
                from_count(row.get("pending"))?,
                from_count(row.get("accepted"))?,
                from_count(row.get("rejected"))?,
                from_count(row.get("expired"))?,
                row.get("discount_sum"),
                u128::from(proposed_sum),
            ))
        })
    }
}
