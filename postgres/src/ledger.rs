//! Trip ledger and seller policies.

use crate::{PostgresMarketplace, db_err, from_i32, not_found, to_i32, trip_from_row};
use fare_negotiation_core::{
    Money, PolicyStore, ResourceLedger, SeatDecrement, SellerPolicy, StoreError, StoreFuture,
    TripId, TripSnapshot, TripStatus, UserId,
};
use sqlx::{PgExecutor, Row};

/// Lock the trip row until the transaction ends, returning its status.
///
/// Offer inserts and conversions both take this lock first, so a booking and
/// a new offer on the same trip never interleave.
pub(crate) async fn lock_trip<'e, E>(
    executor: E,
    trip: TripId,
) -> Result<Option<TripStatus>, StoreError>
where
    E: PgExecutor<'e>,
{
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM trips WHERE id = $1 FOR UPDATE")
            .bind(*trip.as_uuid())
            .fetch_optional(executor)
            .await
            .map_err(db_err)?;

    status.as_deref().map(TripStatus::parse).transpose()
}

/// Decrement-if-sufficient. Returns the seats left, or `None` when the trip
/// is missing or short.
pub(crate) async fn take_seats<'e, E>(
    executor: E,
    trip: TripId,
    count: u32,
) -> Result<Option<u32>, StoreError>
where
    E: PgExecutor<'e>,
{
    let remaining: Option<i32> = sqlx::query_scalar(
        r"
        UPDATE trips
        SET available_seats = available_seats - $2,
            status = CASE
                WHEN available_seats - $2 = 0 AND status = 'scheduled' THEN 'full'
                ELSE status
            END,
            updated_at = now()
        WHERE id = $1 AND available_seats >= $2
        RETURNING available_seats
        ",
    )
    .bind(*trip.as_uuid())
    .bind(to_i32(count)?)
    .fetch_optional(executor)
    .await
    .map_err(db_err)?;

    remaining.map(from_i32).transpose()
}

pub(crate) async fn available_seats<'e, E>(
    executor: E,
    trip: TripId,
) -> Result<Option<u32>, StoreError>
where
    E: PgExecutor<'e>,
{
    let available: Option<i32> =
        sqlx::query_scalar("SELECT available_seats FROM trips WHERE id = $1")
            .bind(*trip.as_uuid())
            .fetch_optional(executor)
            .await
            .map_err(db_err)?;

    available.map(from_i32).transpose()
}

pub(crate) async fn reservation_exists<'e, E>(
    executor: E,
    trip: TripId,
    buyer: UserId,
) -> Result<bool, StoreError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar(
        r"
        SELECT EXISTS (
            SELECT 1
            FROM reservations
            WHERE trip_id = $1 AND buyer_id = $2 AND status = 'confirmed'
        )
        ",
    )
    .bind(*trip.as_uuid())
    .bind(*buyer.as_uuid())
    .fetch_one(executor)
    .await
    .map_err(db_err)
}

impl ResourceLedger for PostgresMarketplace {
    fn trip(&self, id: TripId) -> StoreFuture<'_, Option<TripSnapshot>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, seller_id, price_per_seat, available_seats, status, negotiable
                FROM trips
                WHERE id = $1
                ",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            row.as_ref().map(trip_from_row).transpose()
        })
    }

    fn decrement_seats(&self, id: TripId, count: u32) -> StoreFuture<'_, SeatDecrement> {
        Box::pin(async move {
            if let Some(remaining) = take_seats(&self.pool, id, count).await? {
                return Ok(SeatDecrement::Applied { remaining });
            }
            match available_seats(&self.pool, id).await? {
                Some(available) => Ok(SeatDecrement::Insufficient { available }),
                None => Err(not_found("trip", id)),
            }
        })
    }

    fn has_confirmed_reservation(&self, trip: TripId, buyer: UserId) -> StoreFuture<'_, bool> {
        Box::pin(async move { reservation_exists(&self.pool, trip, buyer).await })
    }
}

impl PolicyStore for PostgresMarketplace {
    fn seller_policy(&self, seller: UserId) -> StoreFuture<'_, Option<SellerPolicy>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT enabled, min_price_percentage, max_discount
                FROM seller_policies
                WHERE seller_id = $1
                ",
            )
            .bind(*seller.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let percentage: i16 = row.get("min_price_percentage");
            Ok(Some(SellerPolicy {
                enabled: row.get("enabled"),
                min_price_percentage: u8::try_from(percentage).map_err(|_| {
                    StoreError::Serialization(format!("Invalid policy percentage: {percentage}"))
                })?,
                max_discount: Money::from_i64(row.get("max_discount"))?,
            }))
        })
    }

    fn save_seller_policy(&self, seller: UserId, policy: SellerPolicy) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO seller_policies (seller_id, enabled, min_price_percentage, max_discount)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (seller_id) DO UPDATE
                SET enabled = EXCLUDED.enabled,
                    min_price_percentage = EXCLUDED.min_price_percentage,
                    max_discount = EXCLUDED.max_discount,
                    updated_at = now()
                ",
            )
            .bind(*seller.as_uuid())
            .bind(policy.enabled)
            .bind(i16::from(policy.min_price_percentage))
            .bind(policy.max_discount.to_i64()?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            tracing::info!(
                seller_id = %seller,
                enabled = policy.enabled,
                min_price_percentage = policy.min_price_percentage,
                "Seller policy saved"
            );
            Ok(())
        })
    }
}
