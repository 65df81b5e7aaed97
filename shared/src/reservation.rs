use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};
use crate::pricing::{PricingSnapshot, ServiceType};
use crate::time_window::Slot;

const PUBLIC_ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PUBLIC_ID_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    New,
    PendingPayment,
    Confirmed,
    Cancelled,
    Expired,
    InProgress,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::New => "new",
            ReservationStatus::PendingPayment => "pending_payment",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
            ReservationStatus::InProgress => "in_progress",
            ReservationStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Cancelled | ReservationStatus::Expired | ReservationStatus::Completed
        )
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        match (self, next) {
            (New, PendingPayment)
            | (New, Confirmed)
            | (PendingPayment, Confirmed)
            | (PendingPayment, Expired)
            | (Confirmed, InProgress)
            | (InProgress, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ReservationStatus::New),
            "pending_payment" => Ok(ReservationStatus::PendingPayment),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "expired" => Ok(ReservationStatus::Expired),
            "in_progress" => Ok(ReservationStatus::InProgress),
            "completed" => Ok(ReservationStatus::Completed),
            other => Err(BookingError::CorruptRecord(format!("unknown status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    HoldForPayment { until: DateTime<Utc> },
    Confirm,
    Expire,
    Cancel,
    Start,
    Complete,
}

impl StatusChange {
    pub fn target(&self) -> ReservationStatus {
        match self {
            StatusChange::HoldForPayment { .. } => ReservationStatus::PendingPayment,
            StatusChange::Confirm => ReservationStatus::Confirmed,
            StatusChange::Expire => ReservationStatus::Expired,
            StatusChange::Cancel => ReservationStatus::Cancelled,
            StatusChange::Start => ReservationStatus::InProgress,
            StatusChange::Complete => ReservationStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub public_id: String,
    pub service_type: ServiceType,
    pub status: ReservationStatus,
    pub slot: Slot,
    pub after_hours: bool,
    pub payment_expires_at: Option<DateTime<Utc>>,
    pub pricing: PricingSnapshot,
    pub payment_session: Option<PaymentSession>,
    pub customer: Customer,
    pub address: String,
    pub vehicle_plate: Option<String>,
    pub symptoms: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn apply(&mut self, change: StatusChange, now: DateTime<Utc>) -> BookingResult<()> {
        let next = change.target();
        if self.status == ReservationStatus::Expired && next == ReservationStatus::Confirmed {
            return Err(BookingError::LateConfirmationAfterExpiry {
                public_id: self.public_id.clone(),
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(BookingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        self.payment_expires_at = match change {
            StatusChange::HoldForPayment { until } => Some(until),
            _ => None,
        };
        self.updated_at = now;
        Ok(())
    }

    /// Returns false, leaving the record untouched, when a session is
    /// already attached. The hold is stretched to the session's own expiry
    /// so a customer can never pay for a slot the sweeper already released.
    pub fn attach_session(
        &mut self,
        session: PaymentSession,
        session_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BookingResult<bool> {
        if self.payment_session.is_some() {
            return Ok(false);
        }
        if self.status != ReservationStatus::PendingPayment {
            return Err(BookingError::InvalidTransition {
                from: self.status,
                to: ReservationStatus::PendingPayment,
            });
        }
        self.payment_session = Some(session);
        self.payment_expires_at = self.payment_expires_at.max(Some(session_expires_at));
        self.updated_at = now;
        Ok(true)
    }

    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::PendingPayment
            && self.payment_expires_at.map_or(true, |deadline| deadline <= now)
    }
}

pub fn new_public_id() -> String {
    let mut rng = rand::thread_rng();
    (0..PUBLIC_ID_LEN)
        .map(|_| PUBLIC_ID_ALPHABET[rng.gen_range(0..PUBLIC_ID_ALPHABET.len())] as char)
        .collect()
}
