use chrono::{NaiveDate, Weekday};
use thiserror::Error;

use crate::reservation::ReservationStatus;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid start time: {0}")]
    InvalidTimeFormat(String),

    #[error("we are closed on {weekday:?} {date}; please pick a weekday")]
    ClosedDay { date: NaiveDate, weekday: Weekday },

    #[error("start time {requested} is outside business hours; bookings can start between {earliest} and {latest}")]
    OutsideBusinessHours {
        requested: String,
        earliest: String,
        latest: String,
    },

    #[error("start time {0} has already passed")]
    SlotInPast(String),

    #[error("unsupported service type: {0}")]
    UnsupportedServiceType(String),

    #[error("the requested time overlaps an existing booking; please choose another time")]
    SlotConflict,

    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("booking {0} not found")]
    ReservationNotFound(String),

    #[error("payment event {event_id} references unknown booking {public_id}")]
    OrphanPayment { event_id: String, public_id: String },

    #[error("payment for booking {public_id} arrived after its hold expired")]
    LateConfirmationAfterExpiry { public_id: String },

    #[error("payment provider unavailable for booking {public_id}: {reason}")]
    GatewayUnavailable { public_id: String, reason: String },

    #[error("booking store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("stored record is unreadable: {0}")]
    CorruptRecord(String),
}

impl BookingError {
    pub fn is_retryable_with_different_input(&self) -> bool {
        matches!(self, BookingError::SlotConflict)
    }

    /// Payment has been captured but the booking could not be confirmed.
    /// These go to the operator, never to the paying customer.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(
            self,
            BookingError::OrphanPayment { .. }
                | BookingError::LateConfirmationAfterExpiry { .. }
                | BookingError::InvalidTransition { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            BookingError::InvalidTimeFormat(_) => "invalid_time_format",
            BookingError::ClosedDay { .. } => "closed_day",
            BookingError::OutsideBusinessHours { .. } => "outside_business_hours",
            BookingError::SlotInPast(_) => "slot_in_past",
            BookingError::UnsupportedServiceType(_) => "unsupported_service_type",
            BookingError::SlotConflict => "slot_conflict",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::ReservationNotFound(_) => "not_found",
            BookingError::OrphanPayment { .. } => "orphan_payment",
            BookingError::LateConfirmationAfterExpiry { .. } => "late_confirmation_after_expiry",
            BookingError::GatewayUnavailable { .. } => "gateway_unavailable",
            BookingError::StoreUnavailable(_) => "store_unavailable",
            BookingError::SignatureInvalid => "signature_invalid",
            BookingError::InvalidRequest(_) => "invalid_request",
            BookingError::CorruptRecord(_) => "corrupt_record",
        }
    }
}

impl From<diesel::result::Error> for BookingError {
    fn from(e: diesel::result::Error) -> Self {
        BookingError::StoreUnavailable(e.to_string())
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
