use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use shared::{BookingError, BookingResult, PaymentEvent, PaymentEventKind};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Checks a `t=<unix>,v1=<hex>` signature over `"<t>.<payload>"`.
pub fn verify_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> BookingResult<()> {
    let header = header.ok_or(BookingError::SignatureInvalid)?;
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BookingError::SignatureInvalid)?;
    let signed_at: i64 = timestamp.parse().map_err(|_| BookingError::SignatureInvalid)?;
    if (now_unix - signed_at).abs() > tolerance_secs {
        return Err(BookingError::SignatureInvalid);
    }

    let expected = sign(timestamp, payload, secret)?;
    if candidates.iter().any(|candidate| constant_time_eq(&expected, candidate)) {
        Ok(())
    } else {
        Err(BookingError::SignatureInvalid)
    }
}

pub fn sign(timestamp: &str, payload: &[u8], secret: &str) -> BookingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| BookingError::SignatureInvalid)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: RawSession,
}

#[derive(Deserialize)]
struct RawSession {
    id: Option<String>,
    client_reference_id: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
}

pub fn parse_event(payload: &[u8]) -> BookingResult<PaymentEvent> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| BookingError::InvalidRequest(format!("unreadable payment event: {}", e)))?;

    let session = raw.data.object;
    let kind = match raw.event_type.as_str() {
        "checkout.session.completed" if session.payment_status.as_deref() == Some("paid") => {
            PaymentEventKind::Completed
        }
        "checkout.session.async_payment_succeeded" => PaymentEventKind::Completed,
        "checkout.session.expired" => PaymentEventKind::SessionExpired,
        other => PaymentEventKind::Other(other.to_string()),
    };

    Ok(PaymentEvent {
        event_id: raw.id,
        kind,
        public_id: session.client_reference_id,
        session_id: session.id,
        amount_minor: session.amount_total,
        currency: session.currency,
    })
}
