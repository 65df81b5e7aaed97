#![allow(dead_code)]

use async_trait::async_trait;
use booking_service::confirmation::ConfirmationProcessor;
use booking_service::gateway::{CheckoutRequest, PaymentGateway};
use booking_service::notify::{Dispatcher, Notifier};
use booking_service::pipeline::{BookingPolicy, BookingRequest, BookingService, CustomerDetails};
use booking_service::retry::{CallError, RetryPolicy};
use booking_service::store::{IdempotencyLedger, MemoryStore, ReservationStore};
use chrono::{DateTime, Duration, Utc};
use shared::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Longer than the checkout provider's minimum session lifetime, so the
/// hold deadline set at reservation time is the one that sticks.
pub const HOLD_MINUTES: i64 = 45;

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}

/// Wednesday morning before the booked Monday.
pub fn booking_day_now() -> DateTime<Utc> {
    at("2024-07-10T09:00:00Z")
}

pub fn request(service_type: &str, local_start_time: &str) -> BookingRequest {
    BookingRequest {
        service_type: service_type.to_string(),
        local_start_time: local_start_time.to_string(),
        address: "12 Harbour Road, Bristol BS1 4RN".to_string(),
        vehicle_plate: Some("WR19 KXA".to_string()),
        customer: CustomerDetails {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "07700 900123".to_string(),
        },
        symptoms: Some("Engine warning light".to_string()),
        notes: None,
    }
}

pub fn paid(event_id: &str, reservation: &Reservation) -> PaymentEvent {
    PaymentEvent {
        event_id: event_id.to_string(),
        kind: PaymentEventKind::Completed,
        public_id: Some(reservation.public_id.clone()),
        session_id: reservation.payment_session.as_ref().map(|s| s.id.clone()),
        amount_minor: reservation.pricing.minor_units(),
        currency: Some(reservation.pricing.currency.clone()),
    }
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        timeout: std::time::Duration::from_millis(200),
        backoff: std::time::Duration::from_millis(1),
    }
}

pub fn policy(fees: FeeTable, hold_minutes: i64) -> BookingPolicy {
    let hours = BusinessHours::default();
    BookingPolicy {
        resolver: TimeWindowResolver::new(hours.timezone, 30),
        hours,
        fees: Arc::new(fees),
        hold: Duration::minutes(hold_minutes),
        success_url: "https://shop.example/bookings/{public_id}/paid".to_string(),
        cancel_url: "https://shop.example/bookings/{public_id}".to_string(),
        retry: quick_retry(),
    }
}

/// Gateway that fails a configurable number of calls before succeeding.
#[derive(Default)]
pub struct ScriptedGateway {
    pub calls: AtomicU32,
    pub failures_left: AtomicU32,
    pub permanent: AtomicBool,
    pub requests: Mutex<Vec<CheckoutRequest>>,
}

impl ScriptedGateway {
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn open_session(&self, request: &CheckoutRequest) -> Result<PaymentSession, CallError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if self.permanent.load(Ordering::SeqCst) {
            return Err(CallError::Permanent("card payments disabled".into()));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CallError::Transient("connection reset".into()));
        }
        Ok(PaymentSession {
            id: format!("cs_test_{}_{}", request.public_id, n),
            checkout_url: format!("https://checkout.example/pay/{}", request.public_id),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<BookingNotification>>,
    pub failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<BookingNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, notification: &BookingNotification) -> Result<(), CallError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CallError::Permanent("mailbox full".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Wraps the in-memory store and can be told to fail like a lost database.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_reserve: AtomicBool,
    pub fail_transition: AtomicBool,
}

fn outage() -> BookingError {
    BookingError::StoreUnavailable("connection refused".into())
}

#[async_trait]
impl ReservationStore for FlakyStore {
    async fn reserve(&self, reservation: Reservation, now: DateTime<Utc>) -> BookingResult<Reservation> {
        if self.fail_reserve.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.reserve(reservation, now).await
    }

    async fn transition(&self, id: Uuid, change: StatusChange, now: DateTime<Utc>) -> BookingResult<Reservation> {
        if self.fail_transition.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.transition(id, change, now).await
    }

    async fn attach_payment_session(
        &self,
        id: Uuid,
        session: PaymentSession,
        session_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BookingResult<Reservation> {
        self.inner
            .attach_payment_session(id, session, session_expires_at, now)
            .await
    }

    async fn find_by_public_id(&self, public_id: &str) -> BookingResult<Option<Reservation>> {
        self.inner.find_by_public_id(public_id).await
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> BookingResult<Vec<Reservation>> {
        self.inner.expire_stale(now).await
    }
}

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub ledger: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub bookings: BookingService,
    pub confirmations: Arc<ConfirmationProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_fees(FeeTable::standard())
    }

    pub fn with_fees(fees: FeeTable) -> Self {
        Self::build(fees, HOLD_MINUTES)
    }

    pub fn with_hold(hold_minutes: i64) -> Self {
        Self::build(FeeTable::standard(), hold_minutes)
    }

    fn build(fees: FeeTable, hold_minutes: i64) -> Self {
        let store = Arc::new(FlakyStore::default());
        let ledger = Arc::new(MemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let dispatcher = Dispatcher::new(vec![notifier.clone() as Arc<dyn Notifier>], quick_retry());
        let bookings = BookingService::new(policy(fees, hold_minutes), store.clone(), gateway.clone(), dispatcher.clone());
        let confirmations = Arc::new(ConfirmationProcessor::new(
            store.clone(),
            ledger.clone() as Arc<dyn IdempotencyLedger>,
            dispatcher,
        ));

        Self {
            store,
            ledger,
            gateway,
            notifier,
            bookings,
            confirmations,
        }
    }

    /// A second service over the same store, priced from another table.
    pub fn repriced(&self, fees: FeeTable) -> BookingService {
        let dispatcher = Dispatcher::new(vec![self.notifier.clone() as Arc<dyn Notifier>], quick_retry());
        BookingService::new(policy(fees, HOLD_MINUTES), self.store.clone(), self.gateway.clone(), dispatcher)
    }

    pub async fn reserve_diagnostics(&self, now: DateTime<Utc>) -> Reservation {
        self.bookings
            .create_booking_at(request("diagnostics", "2024-07-15T10:00"), now)
            .await
            .unwrap()
            .reservation()
            .clone()
    }
}
