use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::conflict::{self, SLOT_HOLDING_STATUSES};
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::{needs_neighbours, plan_transition, Applied, IdempotencyLedger, ReservationStore};
use crate::models::*;
use crate::schema::*;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Serializes every slot-sensitive write for the single mechanic calendar.
const SLOT_LOCK_KEY: i64 = 0x5345_5256_4943_45;

type DbPool = Pool<AsyncPgConnection>;

pub fn run_migrations(database_url: &str) -> Result<()> {
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

fn unavailable(e: impl std::fmt::Display) -> BookingError {
    BookingError::StoreUnavailable(e.to_string())
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder().build(config).await?;
        Ok(Self { pool })
    }
}

async fn lock_slots(conn: &mut AsyncPgConnection) -> BookingResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<BigInt, _>(SLOT_LOCK_KEY)
        .execute(conn)
        .await?;
    Ok(())
}

async fn lock_by_id(conn: &mut AsyncPgConnection, id: Uuid) -> BookingResult<Reservation> {
    let row = reservations::table
        .find(id)
        .for_update()
        .get_result::<DbReservation>(conn)
        .await
        .optional()?
        .ok_or_else(|| BookingError::ReservationNotFound(id.to_string()))?;
    Reservation::try_from(row)
}

async fn overlapping_holders(conn: &mut AsyncPgConnection, slot: &Slot) -> BookingResult<Vec<Reservation>> {
    let rows = reservations::table
        .filter(reservations::status.eq_any(SLOT_HOLDING_STATUSES))
        .filter(reservations::slot_start.lt(slot.end))
        .filter(reservations::slot_end.gt(slot.start))
        .load::<DbReservation>(conn)
        .await?;
    rows.into_iter().map(Reservation::try_from).collect()
}

/// Writes the new lifecycle only over the status it was planned from.
async fn save_lifecycle(
    conn: &mut AsyncPgConnection,
    r: &Reservation,
    planned_from: ReservationStatus,
) -> BookingResult<()> {
    let updated = diesel::update(
        reservations::table
            .find(r.id)
            .filter(reservations::status.eq(planned_from.as_str())),
    )
    .set((
        reservations::status.eq(r.status.as_str()),
        reservations::payment_expires_at.eq(r.payment_expires_at),
        reservations::updated_at.eq(r.updated_at),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        return Err(BookingError::StoreUnavailable(format!(
            "reservation {} left {} while it was being updated",
            r.public_id, planned_from
        )));
    }
    Ok(())
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn reserve(&self, reservation: Reservation, now: DateTime<Utc>) -> BookingResult<Reservation> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let row = DbReservation::try_from(&reservation)?;
        let slot = reservation.slot;

        conn.transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                lock_slots(conn).await?;
                let holders = overlapping_holders(conn, &slot).await?;
                conflict::ensure_free(holders.iter(), &slot, now)?;

                diesel::insert_into(reservations::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .await?;

        info!("Reserved slot {} - {} as {}", slot.start, slot.end, reservation.public_id);
        Ok(reservation)
    }

    async fn transition(&self, id: Uuid, change: StatusChange, now: DateTime<Utc>) -> BookingResult<Reservation> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;

        let applied = conn
            .transaction::<Applied, BookingError, _>(|conn| {
                Box::pin(async move {
                    lock_slots(conn).await?;
                    let current = lock_by_id(conn, id).await?;
                    let planned_from = current.status;
                    let neighbours = if needs_neighbours(&current, change, now) {
                        overlapping_holders(conn, &current.slot).await?
                    } else {
                        Vec::new()
                    };
                    let applied = plan_transition(current, change, now, neighbours.iter())?;
                    save_lifecycle(conn, applied.record(), planned_from).await?;
                    Ok(applied)
                })
            })
            .await?;

        applied.into_result()
    }

    async fn attach_payment_session(
        &self,
        id: Uuid,
        session: PaymentSession,
        session_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BookingResult<Reservation> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;

        conn.transaction::<Reservation, BookingError, _>(|conn| {
            Box::pin(async move {
                let mut current = lock_by_id(conn, id).await?;

                if current.attach_session(session.clone(), session_expires_at, now)? {
                    diesel::update(reservations::table.find(id))
                        .set((
                            reservations::payment_session_id.eq(Some(session.id)),
                            reservations::checkout_url.eq(Some(session.checkout_url)),
                            reservations::payment_expires_at.eq(current.payment_expires_at),
                            reservations::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                }
                Ok(current)
            })
        })
        .await
    }

    async fn find_by_public_id(&self, public_id: &str) -> BookingResult<Option<Reservation>> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let row = reservations::table
            .filter(reservations::public_id.eq(public_id))
            .first::<DbReservation>(&mut conn)
            .await
            .optional()?;
        row.map(Reservation::try_from).transpose()
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> BookingResult<Vec<Reservation>> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;

        let rows = conn
            .transaction::<Vec<DbReservation>, BookingError, _>(|conn| {
                Box::pin(async move {
                    lock_slots(conn).await?;
                    let rows = diesel::update(
                        reservations::table
                            .filter(reservations::status.eq(ReservationStatus::PendingPayment.as_str()))
                            .filter(reservations::payment_expires_at.le(now)),
                    )
                    .set((
                        reservations::status.eq(ReservationStatus::Expired.as_str()),
                        reservations::payment_expires_at.eq(None::<DateTime<Utc>>),
                        reservations::updated_at.eq(now),
                    ))
                    .get_results::<DbReservation>(conn)
                    .await?;
                    Ok(rows)
                })
            })
            .await?;

        rows.into_iter().map(Reservation::try_from).collect()
    }
}

#[async_trait]
impl IdempotencyLedger for PgStore {
    async fn record(&self, scope: &str, key: &str, now: DateTime<Utc>) -> BookingResult<bool> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let inserted = diesel::insert_into(idempotency_records::table)
            .values(&NewIdempotencyRecord {
                scope,
                key,
                recorded_at: now,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn release(&self, scope: &str, key: &str) -> BookingResult<()> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        diesel::delete(idempotency_records::table.find((scope, key)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
