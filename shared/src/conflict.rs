use chrono::{DateTime, Utc};

use crate::error::{BookingError, BookingResult};
use crate::reservation::{Reservation, ReservationStatus};
use crate::time_window::Slot;

/// Storage names of the statuses that can occupy a slot. Pending holds
/// additionally need an unexpired deadline, see [`holds_slot`].
pub const SLOT_HOLDING_STATUSES: [&str; 3] = ["pending_payment", "confirmed", "in_progress"];

pub fn holds_slot(reservation: &Reservation, now: DateTime<Utc>) -> bool {
    match reservation.status {
        ReservationStatus::Confirmed | ReservationStatus::InProgress => true,
        ReservationStatus::PendingPayment => !reservation.hold_lapsed(now),
        ReservationStatus::New
        | ReservationStatus::Cancelled
        | ReservationStatus::Expired
        | ReservationStatus::Completed => false,
    }
}

pub fn find_conflict<'a, I>(
    existing: I,
    proposed: &Slot,
    now: DateTime<Utc>,
    ignore: Option<uuid::Uuid>,
) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing.into_iter().find(|r| {
        Some(r.id) != ignore && holds_slot(r, now) && r.slot.overlaps(proposed)
    })
}

pub fn ensure_free<'a, I>(existing: I, proposed: &Slot, now: DateTime<Utc>) -> BookingResult<()>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    match find_conflict(existing, proposed, now, None) {
        Some(_) => Err(BookingError::SlotConflict),
        None => Ok(()),
    }
}
