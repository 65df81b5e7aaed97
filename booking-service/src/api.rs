use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::confirmation::{ConfirmationOutcome, ConfirmationProcessor};
use crate::pipeline::{BookingOutcome, BookingRequest, BookingService};
use crate::webhook::{parse_event, verify_signature, SIGNATURE_HEADER};

#[derive(Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub tolerance_secs: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub bookings: BookingService,
    pub confirmations: Arc<ConfirmationProcessor>,
    pub webhook: WebhookConfig,
    pub fallback_phone: String,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub public_id: String,
    pub status: ReservationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub public_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub public_id: String,
    pub status: ReservationStatus,
    pub service_type: ServiceType,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub local_start: String,
    pub after_hours: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_expires_at: Option<DateTime<Utc>>,
    pub total: BigDecimal,
    pub currency: String,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WebhookOutcome {
    Processed(ConfirmationOutcome),
    NeedsReconciliation { outcome: &'static str, error: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub retry_with_different_time: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_phone: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/:public_id", get(get_booking))
        .route("/bookings/:public_id/checkout", post(open_checkout))
        .route("/bookings/:public_id/cancel", post(cancel_booking))
        .route("/bookings/:public_id/start", post(start_booking))
        .route("/bookings/:public_id/complete", post(complete_booking))
        .route("/webhooks/payment", post(payment_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub fn status_for(error: &BookingError) -> StatusCode {
    match error {
        BookingError::InvalidTimeFormat(_)
        | BookingError::ClosedDay { .. }
        | BookingError::OutsideBusinessHours { .. }
        | BookingError::SlotInPast(_)
        | BookingError::UnsupportedServiceType(_)
        | BookingError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::SlotConflict
        | BookingError::InvalidTransition { .. }
        | BookingError::OrphanPayment { .. }
        | BookingError::LateConfirmationAfterExpiry { .. } => StatusCode::CONFLICT,
        BookingError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
        BookingError::GatewayUnavailable { .. } => StatusCode::BAD_GATEWAY,
        BookingError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BookingError::SignatureInvalid => StatusCode::UNAUTHORIZED,
        BookingError::CorruptRecord(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(state: &AppState, error: BookingError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    } else {
        tracing::debug!("Request rejected: {}", error);
    }

    let fallback_phone = matches!(error, BookingError::StoreUnavailable(_)).then(|| state.fallback_phone.clone());
    let message = match &fallback_phone {
        Some(phone) => format!("We can't take bookings online right now. Please call us on {}.", phone),
        None => error.to_string(),
    };
    (
        status,
        Json(ErrorResponse {
            error: error.code().to_string(),
            message,
            retry_with_different_time: error.is_retryable_with_different_input(),
            fallback_phone,
        }),
    )
}

fn view(state: &AppState, reservation: &Reservation) -> BookingView {
    let timezone = state.bookings.policy().resolver.timezone;
    BookingView {
        public_id: reservation.public_id.clone(),
        status: reservation.status,
        service_type: reservation.service_type,
        slot_start: reservation.slot.start,
        slot_end: reservation.slot.end,
        local_start: reservation
            .slot
            .start
            .with_timezone(&timezone)
            .format("%Y-%m-%dT%H:%M")
            .to_string(),
        after_hours: reservation.after_hours,
        payment_expires_at: reservation.payment_expires_at,
        total: reservation.pricing.total.clone(),
        currency: reservation.pricing.currency.clone(),
        line_items: reservation.pricing.line_items.clone(),
    }
}

pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<BookingRequest>,
) -> ApiResult<(StatusCode, Json<CreateBookingResponse>)> {
    let outcome = state
        .bookings
        .create_booking(request)
        .await
        .map_err(|e| reject(&state, e))?;

    let checkout_url = match &outcome {
        BookingOutcome::AwaitingPayment { checkout_url, .. } => Some(checkout_url.clone()),
        BookingOutcome::Confirmed { .. } => None,
    };
    let reservation = outcome.reservation();
    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            public_id: reservation.public_id.clone(),
            status: reservation.status,
            checkout_url,
        }),
    ))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let reservation = state
        .bookings
        .get_booking(&public_id)
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(view(&state, &reservation)))
}

pub async fn open_checkout(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> ApiResult<Json<CheckoutResponse>> {
    match state.bookings.open_checkout(&public_id).await {
        Ok(BookingOutcome::AwaitingPayment { reservation, checkout_url }) => Ok(Json(CheckoutResponse {
            public_id: reservation.public_id,
            checkout_url,
        })),
        Ok(BookingOutcome::Confirmed { reservation }) => Err(reject(
            &state,
            BookingError::InvalidTransition {
                from: reservation.status,
                to: ReservationStatus::PendingPayment,
            },
        )),
        Err(e) => Err(reject(&state, e)),
    }
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let reservation = state.bookings.cancel(&public_id).await.map_err(|e| reject(&state, e))?;
    Ok(Json(view(&state, &reservation)))
}

pub async fn start_booking(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let reservation = state.bookings.start(&public_id).await.map_err(|e| reject(&state, e))?;
    Ok(Json(view(&state, &reservation)))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let reservation = state.bookings.complete(&public_id).await.map_err(|e| reject(&state, e))?;
    Ok(Json(view(&state, &reservation)))
}

/// Payment provider callback. Anything the provider should not retry is
/// acknowledged with 200, including events that need an operator.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = verify_signature(
        signature,
        &body,
        &state.webhook.secret,
        state.webhook.tolerance_secs,
        Utc::now().timestamp(),
    ) {
        tracing::warn!("Rejected payment webhook: {}", e);
        return Err(reject(&state, e));
    }

    let event = parse_event(&body).map_err(|e| {
        let (_, body) = reject(&state, e);
        (StatusCode::BAD_REQUEST, body)
    })?;

    let outcome = match state.confirmations.process(event).await {
        Ok(outcome) => WebhookOutcome::Processed(outcome),
        Err(e) if e.requires_reconciliation() => WebhookOutcome::NeedsReconciliation {
            outcome: "needs_reconciliation",
            error: e.code().to_string(),
        },
        Err(e) => return Err(reject(&state, e)),
    };
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
