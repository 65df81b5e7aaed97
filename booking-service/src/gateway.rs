use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::PaymentSession;
use std::time::Duration;
use uuid::Uuid;

use crate::retry::CallError;

/// Stripe refuses checkout sessions that expire sooner than 30 minutes.
pub const MIN_SESSION_LIFETIME_MINUTES: i64 = 31;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub reservation_id: Uuid,
    pub public_id: String,
    pub description: String,
    pub amount_minor: i64,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn open_session(&self, request: &CheckoutRequest) -> Result<PaymentSession, CallError>;
}

#[derive(Debug, Clone)]
pub struct StripeCheckout {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

impl StripeCheckout {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    fn idempotency_key(request: &CheckoutRequest) -> String {
        format!("checkout-{}-{}", request.reservation_id, request.expires_at.timestamp())
    }

    fn form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "payment".to_string()),
            ("client_reference_id", request.public_id.clone()),
            ("customer_email", request.customer_email.clone()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("expires_at", request.expires_at.timestamp().to_string()),
            ("metadata[reservation_id]", request.reservation_id.to_string()),
            ("metadata[public_id]", request.public_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            ("line_items[0][price_data][unit_amount]", request.amount_minor.to_string()),
            ("line_items[0][price_data][product_data][name]", request.description.clone()),
        ]
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckout {
    async fn open_session(&self, request: &CheckoutRequest) -> Result<PaymentSession, CallError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", Self::idempotency_key(request))
            .form(&Self::form(request))
            .send()
            .await
            .map_err(|e| CallError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallError::Transient(format!("checkout provider returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Permanent(format!("checkout provider returned {}: {}", status, body)));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| CallError::Transient(format!("unreadable checkout response: {}", e)))?;
        let checkout_url = session
            .url
            .ok_or_else(|| CallError::Permanent(format!("checkout session {} has no url", session.id)))?;

        Ok(PaymentSession {
            id: session.id,
            checkout_url,
        })
    }
}
