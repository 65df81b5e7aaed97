mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{run_migrations, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::conflict::find_conflict;
use shared::{BookingError, BookingResult, PaymentSession, Reservation, StatusChange};
use uuid::Uuid;

/// Single owner of reservation state. Every mutation is one atomic call;
/// callers never read, modify and write back.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn reserve(&self, reservation: Reservation, now: DateTime<Utc>) -> BookingResult<Reservation>;

    async fn transition(&self, id: Uuid, change: StatusChange, now: DateTime<Utc>) -> BookingResult<Reservation>;

    /// Attaches the checkout session to a pending hold and stretches the
    /// hold to the session's expiry. A hold that already has a session is
    /// returned unchanged.
    async fn attach_payment_session(
        &self,
        id: Uuid,
        session: PaymentSession,
        session_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BookingResult<Reservation>;

    async fn find_by_public_id(&self, public_id: &str) -> BookingResult<Option<Reservation>>;

    async fn expire_stale(&self, now: DateTime<Utc>) -> BookingResult<Vec<Reservation>>;
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Returns false when the key was already recorded.
    async fn record(&self, scope: &str, key: &str, now: DateTime<Utc>) -> BookingResult<bool>;

    async fn release(&self, scope: &str, key: &str) -> BookingResult<()>;
}

pub(crate) enum Applied {
    Changed(Reservation),
    /// A lapsed hold was asked to confirm but its slot has been taken.
    ExpiredInstead(Reservation),
}

impl Applied {
    pub(crate) fn record(&self) -> &Reservation {
        match self {
            Applied::Changed(r) | Applied::ExpiredInstead(r) => r,
        }
    }

    pub(crate) fn into_result(self) -> BookingResult<Reservation> {
        match self {
            Applied::Changed(r) => Ok(r),
            Applied::ExpiredInstead(r) => Err(BookingError::LateConfirmationAfterExpiry {
                public_id: r.public_id,
            }),
        }
    }
}

pub(crate) fn needs_neighbours(current: &Reservation, change: StatusChange, now: DateTime<Utc>) -> bool {
    change == StatusChange::Confirm && current.hold_lapsed(now)
}

/// Shared transition rules for every store. A lapsed but unswept hold may
/// still be confirmed as long as nothing else holds an overlapping slot.
pub(crate) fn plan_transition<'a, I>(
    mut current: Reservation,
    change: StatusChange,
    now: DateTime<Utc>,
    neighbours: I,
) -> BookingResult<Applied>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    if needs_neighbours(&current, change, now)
        && find_conflict(neighbours, &current.slot, now, Some(current.id)).is_some()
    {
        current.apply(StatusChange::Expire, now)?;
        return Ok(Applied::ExpiredInstead(current));
    }
    current.apply(change, now)?;
    Ok(Applied::Changed(current))
}
