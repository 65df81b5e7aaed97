use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::notify::Dispatcher;
use crate::store::{IdempotencyLedger, ReservationStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Confirmed {
        public_id: String,
        failed_notifications: usize,
    },
    Duplicate,
    AlreadyConfirmed { public_id: String },
    HoldReleased { public_id: String },
    Ignored { reason: String },
}

pub struct ConfirmationProcessor {
    store: Arc<dyn ReservationStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    dispatcher: Dispatcher,
}

impl ConfirmationProcessor {
    pub fn new(store: Arc<dyn ReservationStore>, ledger: Arc<dyn IdempotencyLedger>, dispatcher: Dispatcher) -> Self {
        Self { store, ledger, dispatcher }
    }

    pub async fn process(&self, event: PaymentEvent) -> BookingResult<ConfirmationOutcome> {
        self.process_at(event, Utc::now()).await
    }

    pub async fn process_at(&self, event: PaymentEvent, now: DateTime<Utc>) -> BookingResult<ConfirmationOutcome> {
        if !self.ledger.record(PAYMENT_WEBHOOK_SCOPE, &event.event_id, now).await? {
            info!("Payment event {} already processed", event.event_id);
            return Ok(ConfirmationOutcome::Duplicate);
        }

        match self.handle(&event, now).await {
            Err(BookingError::StoreUnavailable(reason)) => {
                // Nothing was committed or dispatched, so a redelivery may
                // safely run the whole event again.
                if let Err(e) = self.ledger.release(PAYMENT_WEBHOOK_SCOPE, &event.event_id).await {
                    error!(event_id = %event.event_id, "Could not release idempotency record: {}", e);
                }
                Err(BookingError::StoreUnavailable(reason))
            }
            Err(e) if e.requires_reconciliation() => {
                error!(
                    event_id = %event.event_id,
                    public_id = event.public_id.as_deref().unwrap_or("-"),
                    "Payment needs manual reconciliation: {}",
                    e
                );
                Err(e)
            }
            other => other,
        }
    }

    async fn handle(&self, event: &PaymentEvent, now: DateTime<Utc>) -> BookingResult<ConfirmationOutcome> {
        let completed = match &event.kind {
            PaymentEventKind::Completed => true,
            PaymentEventKind::SessionExpired => false,
            PaymentEventKind::Other(kind) => {
                return Ok(ConfirmationOutcome::Ignored {
                    reason: format!("unhandled event type {}", kind),
                })
            }
        };

        let public_id = event.public_id.clone().unwrap_or_default();
        let reservation = match self.store.find_by_public_id(&public_id).await? {
            Some(reservation) => reservation,
            None if completed => {
                return Err(BookingError::OrphanPayment {
                    event_id: event.event_id.clone(),
                    public_id,
                })
            }
            None => {
                return Ok(ConfirmationOutcome::Ignored {
                    reason: format!("no booking {} for expired session", public_id),
                })
            }
        };

        if completed {
            self.confirm(reservation, event, now).await
        } else {
            self.release_hold(reservation, event, now).await
        }
    }

    async fn confirm(
        &self,
        reservation: Reservation,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> BookingResult<ConfirmationOutcome> {
        match reservation.status {
            ReservationStatus::Confirmed | ReservationStatus::InProgress | ReservationStatus::Completed => {
                return Ok(ConfirmationOutcome::AlreadyConfirmed {
                    public_id: reservation.public_id,
                })
            }
            ReservationStatus::Expired => {
                return Err(BookingError::LateConfirmationAfterExpiry {
                    public_id: reservation.public_id,
                })
            }
            _ => {}
        }

        if let (Some(paid), Some(expected)) = (event.amount_minor, reservation.pricing.minor_units()) {
            if paid != expected {
                warn!(
                    public_id = %reservation.public_id,
                    "Paid amount {} differs from quoted {} {}",
                    paid,
                    expected,
                    reservation.pricing.currency
                );
            }
        }

        let confirmed = match self.store.transition(reservation.id, StatusChange::Confirm, now).await {
            Ok(confirmed) => confirmed,
            Err(BookingError::InvalidTransition {
                from: ReservationStatus::Confirmed,
                ..
            }) => {
                return Ok(ConfirmationOutcome::AlreadyConfirmed {
                    public_id: reservation.public_id,
                })
            }
            Err(e) => return Err(e),
        };
        info!("Booking {} confirmed by payment event {}", confirmed.public_id, event.event_id);

        let failed_notifications = self
            .dispatcher
            .dispatch(&BookingNotification::confirmed(&confirmed))
            .await;

        Ok(ConfirmationOutcome::Confirmed {
            public_id: confirmed.public_id,
            failed_notifications,
        })
    }

    async fn release_hold(
        &self,
        reservation: Reservation,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> BookingResult<ConfirmationOutcome> {
        let current_session = reservation.payment_session.as_ref().map(|s| s.id.as_str());
        if reservation.status != ReservationStatus::PendingPayment || current_session != event.session_id.as_deref() {
            return Ok(ConfirmationOutcome::Ignored {
                reason: format!("session expiry does not apply to booking {}", reservation.public_id),
            });
        }

        match self.store.transition(reservation.id, StatusChange::Expire, now).await {
            Ok(expired) => {
                info!("Checkout session expired, released hold for {}", expired.public_id);
                Ok(ConfirmationOutcome::HoldReleased {
                    public_id: expired.public_id,
                })
            }
            Err(BookingError::InvalidTransition { from, .. }) => Ok(ConfirmationOutcome::Ignored {
                reason: format!("booking {} is already {}", reservation.public_id, from),
            }),
            Err(e) => Err(e),
        }
    }
}
