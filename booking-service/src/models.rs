use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct DbReservation {
    pub id: Uuid,
    pub public_id: String,
    pub service_type: String,
    pub status: String,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub after_hours: bool,
    pub payment_expires_at: Option<DateTime<Utc>>,
    pub pricing_snapshot: serde_json::Value,
    pub total_amount: bigdecimal::BigDecimal,
    pub currency: String,
    pub payment_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub address: String,
    pub vehicle_plate: Option<String>,
    pub symptoms: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::idempotency_records)]
pub struct NewIdempotencyRecord<'a> {
    pub scope: &'a str,
    pub key: &'a str,
    pub recorded_at: DateTime<Utc>,
}

impl TryFrom<&Reservation> for DbReservation {
    type Error = BookingError;

    fn try_from(r: &Reservation) -> Result<Self, Self::Error> {
        let (payment_session_id, checkout_url) = match &r.payment_session {
            Some(session) => (Some(session.id.clone()), Some(session.checkout_url.clone())),
            None => (None, None),
        };
        Ok(Self {
            id: r.id,
            public_id: r.public_id.clone(),
            service_type: r.service_type.as_str().to_string(),
            status: r.status.as_str().to_string(),
            slot_start: r.slot.start,
            slot_end: r.slot.end,
            after_hours: r.after_hours,
            payment_expires_at: r.payment_expires_at,
            pricing_snapshot: r.pricing.to_record()?,
            total_amount: r.pricing.total.clone(),
            currency: r.pricing.currency.clone(),
            payment_session_id,
            checkout_url,
            customer_name: r.customer.name.clone(),
            customer_email: r.customer.email.clone(),
            customer_phone: r.customer.phone.clone(),
            address: r.address.clone(),
            vehicle_plate: r.vehicle_plate.clone(),
            symptoms: r.symptoms.clone(),
            notes: r.notes.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

impl TryFrom<DbReservation> for Reservation {
    type Error = BookingError;

    fn try_from(row: DbReservation) -> Result<Self, Self::Error> {
        let payment_session = match (row.payment_session_id, row.checkout_url) {
            (Some(id), Some(checkout_url)) => Some(PaymentSession { id, checkout_url }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            public_id: row.public_id,
            service_type: row.service_type.parse()?,
            status: row.status.parse()?,
            slot: Slot {
                start: row.slot_start,
                end: row.slot_end,
            },
            after_hours: row.after_hours,
            payment_expires_at: row.payment_expires_at,
            pricing: PricingSnapshot::from_record(row.pricing_snapshot)?,
            payment_session,
            customer: Customer {
                name: row.customer_name,
                email: row.customer_email,
                phone: row.customer_phone,
            },
            address: row.address,
            vehicle_plate: row.vehicle_plate,
            symptoms: row.symptoms,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
