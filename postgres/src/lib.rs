//! `PostgreSQL` storage for the fare negotiation engine.
//!
//! [`PostgresMarketplace`] implements the three storage traits from
//! `fare-negotiation-core` over a single connection pool:
//!
//! - `NegotiationStore`: negotiation records, with every status change as a
//!   conditional `UPDATE ... WHERE status = $expected`
//! - `ResourceLedger`: the `trips` table, decremented only through
//!   `available_seats >= $n` guarded updates
//! - `PolicyStore`: per-seller auto-accept settings
//!
//! The one-pending-offer-per-buyer rule is a partial unique index, and the
//! composite operations (counter-offer supersede, accept-and-book) each run
//! in one transaction.
//!
//! # Example
//!
//! ```ignore
//! use fare_negotiation_postgres::PostgresMarketplace;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::PgPool::connect("postgres://localhost/rides").await?;
//!     let marketplace = PostgresMarketplace::new(pool);
//!     marketplace.migrate().await?;
//!     Ok(())
//! }
//! ```

mod ledger;
mod negotiations;

use chrono::{DateTime, Utc};
use fare_negotiation_core::{
    Money, Negotiation, NegotiationId, NegotiationStatus, Party, RejectionReason, Reservation,
    ReservationId, StoreError, TripId, TripSnapshot, TripStatus, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Name of the partial unique index enforcing one pending offer per buyer and trip.
pub(crate) const ONE_PENDING_INDEX: &str = "idx_negotiations_one_pending";

pub(crate) const NEGOTIATION_COLUMNS: &str = "id, trip_id, buyer_id, seller_id, original_price, \
    proposed_price, final_price, seats_requested, status, initiated_by, supersedes, \
    rejection_reason, message, response_message, expires_at, responded_at, created_at";

/// Negotiation store, trip ledger and policy store backed by `PostgreSQL`.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresMarketplace {
    pool: PgPool,
}

impl PostgresMarketplace {
    /// Create a marketplace over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(db_err)?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        tracing::info!("Negotiation schema migrated");
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or refresh a trip on the ledger.
    ///
    /// Trips are owned by trip management; this is how its snapshots reach
    /// the engine's database (and how tests seed one).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn upsert_trip(&self, trip: &TripSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO trips (id, seller_id, price_per_seat, available_seats, status, negotiable)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET seller_id = EXCLUDED.seller_id,
                price_per_seat = EXCLUDED.price_per_seat,
                available_seats = EXCLUDED.available_seats,
                status = EXCLUDED.status,
                negotiable = EXCLUDED.negotiable,
                updated_at = now()
            ",
        )
        .bind(*trip.id.as_uuid())
        .bind(*trip.seller_id.as_uuid())
        .bind(trip.price_per_seat.to_i64()?)
        .bind(to_i32(trip.available_seats)?)
        .bind(trip.status.as_str())
        .bind(trip.negotiable)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// The reservation created for a negotiation, if it converted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn reservation_for(
        &self,
        negotiation: NegotiationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, negotiation_id, trip_id, buyer_id, seats_booked, total_price, created_at
            FROM reservations
            WHERE negotiation_id = $1
            ",
        )
        .bind(*negotiation.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(reservation_from_row).transpose()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{what} {id}"))
}

pub(crate) fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("seat count {value} exceeds INTEGER")))
}

pub(crate) fn from_i32(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("negative seat count {value}")))
}

pub(crate) fn from_count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Serialization(format!("negative count {value}")))
}

pub(crate) fn negotiation_from_row(row: &PgRow) -> Result<Negotiation, StoreError> {
    let status: String = row.get("status");
    let initiated_by: String = row.get("initiated_by");
    let rejection_reason: Option<String> = row.get("rejection_reason");
    let final_price: Option<i64> = row.get("final_price");
    let supersedes: Option<Uuid> = row.get("supersedes");
    let expires_at: DateTime<Utc> = row.get("expires_at");

    Ok(Negotiation {
        id: NegotiationId::from_uuid(row.get("id")),
        trip_id: TripId::from_uuid(row.get("trip_id")),
        buyer_id: UserId::from_uuid(row.get("buyer_id")),
        seller_id: UserId::from_uuid(row.get("seller_id")),
        original_price: Money::from_i64(row.get("original_price"))?,
        proposed_price: Money::from_i64(row.get("proposed_price"))?,
        final_price: final_price.map(Money::from_i64).transpose()?,
        seats_requested: from_i32(row.get("seats_requested"))?,
        status: NegotiationStatus::parse(&status)?,
        initiated_by: Party::parse(&initiated_by)?,
        supersedes: supersedes.map(NegotiationId::from_uuid),
        rejection_reason: rejection_reason
            .as_deref()
            .map(RejectionReason::parse)
            .transpose()?,
        message: row.get("message"),
        response_message: row.get("response_message"),
        expires_at,
        responded_at: row.get("responded_at"),
        created_at: row.get("created_at"),
    })
}

pub(crate) fn trip_from_row(row: &PgRow) -> Result<TripSnapshot, StoreError> {
    let status: String = row.get("status");
    Ok(TripSnapshot {
        id: TripId::from_uuid(row.get("id")),
        seller_id: UserId::from_uuid(row.get("seller_id")),
        price_per_seat: Money::from_i64(row.get("price_per_seat"))?,
        available_seats: from_i32(row.get("available_seats"))?,
        status: TripStatus::parse(&status)?,
        negotiable: row.get("negotiable"),
    })
}

pub(crate) fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    Ok(Reservation {
        id: ReservationId::from_uuid(row.get("id")),
        negotiation_id: NegotiationId::from_uuid(row.get("negotiation_id")),
        trip_id: TripId::from_uuid(row.get("trip_id")),
        buyer_id: UserId::from_uuid(row.get("buyer_id")),
        seats_booked: from_i32(row.get("seats_booked"))?,
        total_price: Money::from_i64(row.get("total_price"))?,
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn seat_counts_convert_both_ways() {
        assert_eq!(to_i32(3).unwrap(), 3);
        assert!(to_i32(u32::MAX).is_err());
        assert_eq!(from_i32(4).unwrap(), 4);
        assert!(from_i32(-1).is_err());
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert_eq!(from_count(7).unwrap(), 7);
        assert!(matches!(from_count(-2), Err(StoreError::Serialization(_))));
    }
}
