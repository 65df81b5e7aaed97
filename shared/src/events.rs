use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pricing::ServiceType;
use crate::reservation::Reservation;

pub const PAYMENT_WEBHOOK_SCOPE: &str = "payment_webhook";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEventKind {
    Completed,
    SessionExpired,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: String,
    pub kind: PaymentEventKind,
    pub public_id: Option<String>,
    pub session_id: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingNotification {
    Confirmed {
        reservation_id: Uuid,
        public_id: String,
        service_type: ServiceType,
        slot_start: DateTime<Utc>,
        slot_end: DateTime<Utc>,
        customer_name: String,
        customer_email: String,
        customer_phone: String,
        address: String,
        vehicle_plate: Option<String>,
        total: BigDecimal,
        currency: String,
    },
}

impl BookingNotification {
    pub fn confirmed(reservation: &Reservation) -> Self {
        BookingNotification::Confirmed {
            reservation_id: reservation.id,
            public_id: reservation.public_id.clone(),
            service_type: reservation.service_type,
            slot_start: reservation.slot.start,
            slot_end: reservation.slot.end,
            customer_name: reservation.customer.name.clone(),
            customer_email: reservation.customer.email.clone(),
            customer_phone: reservation.customer.phone.clone(),
            address: reservation.address.clone(),
            vehicle_plate: reservation.vehicle_plate.clone(),
            total: reservation.pricing.total.clone(),
            currency: reservation.pricing.currency.clone(),
        }
    }

    pub fn aggregate_id(&self) -> Uuid {
        match self {
            BookingNotification::Confirmed { reservation_id, .. } => *reservation_id,
        }
    }

    pub fn public_id(&self) -> &str {
        match self {
            BookingNotification::Confirmed { public_id, .. } => public_id,
        }
    }
}
