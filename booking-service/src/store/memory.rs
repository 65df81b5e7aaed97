use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::conflict;
use shared::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{needs_neighbours, plan_transition, IdempotencyLedger, ReservationStore};

#[derive(Default)]
struct Inner {
    reservations: HashMap<Uuid, Reservation>,
    by_public_id: HashMap<String, Uuid>,
    idempotency: HashSet<(String, String)>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> BookingResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| BookingError::StoreUnavailable("in-memory store lock poisoned".to_string()))
    }
}

impl Inner {
    fn get(&self, id: Uuid) -> BookingResult<&Reservation> {
        self.reservations
            .get(&id)
            .ok_or_else(|| BookingError::ReservationNotFound(id.to_string()))
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn reserve(&self, reservation: Reservation, now: DateTime<Utc>) -> BookingResult<Reservation> {
        let mut inner = self.lock()?;
        if inner.by_public_id.contains_key(&reservation.public_id) {
            return Err(BookingError::StoreUnavailable(format!(
                "public id {} already issued",
                reservation.public_id
            )));
        }
        conflict::ensure_free(inner.reservations.values(), &reservation.slot, now)?;

        inner
            .by_public_id
            .insert(reservation.public_id.clone(), reservation.id);
        inner.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn transition(&self, id: Uuid, change: StatusChange, now: DateTime<Utc>) -> BookingResult<Reservation> {
        let mut inner = self.lock()?;
        let current = inner.get(id)?.clone();
        let applied = if needs_neighbours(&current, change, now) {
            plan_transition(current, change, now, inner.reservations.values())?
        } else {
            plan_transition(current, change, now, std::iter::empty())?
        };
        inner.reservations.insert(id, applied.record().clone());
        applied.into_result()
    }

    async fn attach_payment_session(
        &self,
        id: Uuid,
        session: PaymentSession,
        session_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BookingResult<Reservation> {
        let mut inner = self.lock()?;
        let mut current = inner.get(id)?.clone();
        if current.attach_session(session, session_expires_at, now)? {
            inner.reservations.insert(id, current.clone());
        }
        Ok(current)
    }

    async fn find_by_public_id(&self, public_id: &str) -> BookingResult<Option<Reservation>> {
        let inner = self.lock()?;
        Ok(inner
            .by_public_id
            .get(public_id)
            .and_then(|id| inner.reservations.get(id))
            .cloned())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> BookingResult<Vec<Reservation>> {
        let mut inner = self.lock()?;
        let mut expired = Vec::new();
        for reservation in inner.reservations.values_mut() {
            if reservation.hold_lapsed(now) {
                reservation.apply(StatusChange::Expire, now)?;
                expired.push(reservation.clone());
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl IdempotencyLedger for MemoryStore {
    async fn record(&self, scope: &str, key: &str, _now: DateTime<Utc>) -> BookingResult<bool> {
        let mut inner = self.lock()?;
        Ok(inner.idempotency.insert((scope.to_string(), key.to_string())))
    }

    async fn release(&self, scope: &str, key: &str) -> BookingResult<()> {
        let mut inner = self.lock()?;
        inner.idempotency.remove(&(scope.to_string(), key.to_string()));
        Ok(())
    }
}
