use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use shared::*;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::gateway::{CheckoutRequest, PaymentGateway, MIN_SESSION_LIFETIME_MINUTES};
use crate::notify::Dispatcher;
use crate::retry::RetryPolicy;
use crate::store::ReservationStore;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BookingRequest {
    pub service_type: String,
    pub local_start_time: String,
    #[validate(length(min = 10, message = "address must be at least 10 characters"))]
    pub address: String,
    #[serde(default)]
    pub vehicle_plate: Option<String>,
    #[validate]
    pub customer: CustomerDetails,
    #[serde(default)]
    pub symptoms: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CustomerDetails {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "email is not valid"))]
    pub email: String,
    #[validate(length(min = 1, message = "phone is required"))]
    pub phone: String,
}

#[derive(Debug, Clone)]
pub enum BookingOutcome {
    AwaitingPayment { reservation: Reservation, checkout_url: String },
    Confirmed { reservation: Reservation },
}

impl BookingOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            BookingOutcome::AwaitingPayment { reservation, .. } | BookingOutcome::Confirmed { reservation } => {
                reservation
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub resolver: TimeWindowResolver,
    pub hours: BusinessHours,
    pub fees: Arc<FeeTable>,
    pub hold: Duration,
    pub success_url: String,
    pub cancel_url: String,
    pub retry: RetryPolicy,
}

#[derive(Clone)]
pub struct BookingService {
    policy: BookingPolicy,
    store: Arc<dyn ReservationStore>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Dispatcher,
}

impl BookingService {
    pub fn new(
        policy: BookingPolicy,
        store: Arc<dyn ReservationStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            policy,
            store,
            gateway,
            dispatcher,
        }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub async fn create_booking(&self, request: BookingRequest) -> BookingResult<BookingOutcome> {
        self.create_booking_at(request, Utc::now()).await
    }

    pub async fn create_booking_at(&self, request: BookingRequest, now: DateTime<Utc>) -> BookingResult<BookingOutcome> {
        request
            .validate()
            .map_err(|e| BookingError::InvalidRequest(e.to_string()))?;

        let service_type: ServiceType = request.service_type.parse()?;
        let fee = self.policy.fees.service(service_type)?;
        let slot = self
            .policy
            .resolver
            .resolve(&request.local_start_time, fee.duration_minutes)?;
        if slot.start <= now {
            return Err(BookingError::SlotInPast(request.local_start_time));
        }
        let after_hours = self.policy.hours.check(slot.start, fee.after_hours_allowed)?;
        let pricing = self.policy.fees.quote(service_type, after_hours)?;

        let prepaid = fee.payment == PaymentPolicy::Prepaid && !pricing.is_free();

        let mut reservation = Reservation {
            id: Uuid::new_v4(),
            public_id: new_public_id(),
            service_type,
            status: ReservationStatus::New,
            slot,
            after_hours,
            payment_expires_at: None,
            pricing,
            payment_session: None,
            customer: Customer {
                name: request.customer.name,
                email: request.customer.email,
                phone: request.customer.phone,
            },
            address: request.address,
            vehicle_plate: request.vehicle_plate,
            symptoms: request.symptoms,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };

        // NEW is never stored; the insert alone claims the slot.
        let initial = if prepaid {
            StatusChange::HoldForPayment {
                until: now + self.policy.hold,
            }
        } else {
            StatusChange::Confirm
        };
        reservation.apply(initial, now)?;

        let reservation = self.store.reserve(reservation, now).await?;
        info!(
            "Reserved {} {} for {} ({})",
            reservation.service_type, reservation.public_id, reservation.slot.start, reservation.status
        );

        if !prepaid {
            self.dispatcher
                .dispatch(&BookingNotification::confirmed(&reservation))
                .await;
            return Ok(BookingOutcome::Confirmed { reservation });
        }

        let reservation = self.open_session_for(reservation, now).await?;
        Ok(awaiting_payment(reservation))
    }

    pub async fn open_checkout(&self, public_id: &str) -> BookingResult<BookingOutcome> {
        self.open_checkout_at(public_id, Utc::now()).await
    }

    pub async fn open_checkout_at(&self, public_id: &str, now: DateTime<Utc>) -> BookingResult<BookingOutcome> {
        let reservation = self.get_booking_at(public_id, now).await?;
        if reservation.status != ReservationStatus::PendingPayment {
            return Err(BookingError::InvalidTransition {
                from: reservation.status,
                to: ReservationStatus::PendingPayment,
            });
        }
        let reservation = self.open_session_for(reservation, now).await?;
        Ok(awaiting_payment(reservation))
    }

    /// Reads a booking after expiring lapsed holds, so a stale hold is never
    /// reported as pending.
    pub async fn get_booking(&self, public_id: &str) -> BookingResult<Reservation> {
        self.get_booking_at(public_id, Utc::now()).await
    }

    pub async fn get_booking_at(&self, public_id: &str, now: DateTime<Utc>) -> BookingResult<Reservation> {
        self.store.expire_stale(now).await?;
        self.store
            .find_by_public_id(public_id)
            .await?
            .ok_or_else(|| BookingError::ReservationNotFound(public_id.to_string()))
    }

    pub async fn cancel(&self, public_id: &str) -> BookingResult<Reservation> {
        self.change_status(public_id, StatusChange::Cancel, Utc::now()).await
    }

    pub async fn start(&self, public_id: &str) -> BookingResult<Reservation> {
        self.change_status(public_id, StatusChange::Start, Utc::now()).await
    }

    pub async fn complete(&self, public_id: &str) -> BookingResult<Reservation> {
        self.change_status(public_id, StatusChange::Complete, Utc::now()).await
    }

    pub async fn change_status(
        &self,
        public_id: &str,
        change: StatusChange,
        now: DateTime<Utc>,
    ) -> BookingResult<Reservation> {
        let reservation = self.get_booking_at(public_id, now).await?;
        let updated = self.store.transition(reservation.id, change, now).await?;
        info!("Booking {} moved from {} to {}", public_id, reservation.status, updated.status);
        Ok(updated)
    }

    async fn open_session_for(&self, reservation: Reservation, now: DateTime<Utc>) -> BookingResult<Reservation> {
        if reservation.payment_session.is_some() {
            return Ok(reservation);
        }

        let amount_minor = reservation.pricing.minor_units().ok_or_else(|| {
            BookingError::CorruptRecord(format!("total for {} is not payable", reservation.public_id))
        })?;
        let request = CheckoutRequest {
            reservation_id: reservation.id,
            public_id: reservation.public_id.clone(),
            description: checkout_description(&reservation),
            amount_minor,
            currency: reservation.pricing.currency.to_lowercase(),
            customer_email: reservation.customer.email.clone(),
            success_url: self.policy.success_url.replace("{public_id}", &reservation.public_id),
            cancel_url: self.policy.cancel_url.replace("{public_id}", &reservation.public_id),
            expires_at: session_expiry(&reservation, self.policy.hold, now),
        };

        let session = self
            .policy
            .retry
            .run("open checkout session", || self.gateway.open_session(&request))
            .await
            .map_err(|e| {
                warn!("No checkout session for {}: {}", reservation.public_id, e);
                BookingError::GatewayUnavailable {
                    public_id: reservation.public_id.clone(),
                    reason: e.to_string(),
                }
            })?;

        self.store
            .attach_payment_session(reservation.id, session, request.expires_at, now)
            .await
    }
}

/// Fixed once per checkout attempt so gateway retries reuse one idempotency
/// key. Never earlier than the provider's minimum session lifetime; the
/// hold is stretched to match when the session is attached.
fn session_expiry(reservation: &Reservation, hold: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let hold_ends = reservation.payment_expires_at.unwrap_or(now + hold);
    hold_ends.max(now + Duration::minutes(MIN_SESSION_LIFETIME_MINUTES))
}

fn checkout_description(reservation: &Reservation) -> String {
    match reservation.pricing.line_items.first() {
        Some(item) => format!("{} ({})", item.label, reservation.public_id),
        None => format!("{} ({})", reservation.service_type, reservation.public_id),
    }
}

fn awaiting_payment(reservation: Reservation) -> BookingOutcome {
    let checkout_url = reservation
        .payment_session
        .as_ref()
        .map(|s| s.checkout_url.clone())
        .unwrap_or_default();
    BookingOutcome::AwaitingPayment {
        reservation,
        checkout_url,
    }
}
