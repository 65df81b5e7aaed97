use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::retry::CallError;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, CallError>;
}

/// Holds one access token and refreshes it when it is about to expire.
/// Concurrent callers wait on the same refresh instead of each fetching.
pub struct TokenCache<S> {
    source: S,
    skew: Duration,
    current: Mutex<Option<AccessToken>>,
}

impl<S: TokenSource> TokenCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            skew: Duration::seconds(60),
            current: Mutex::new(None),
        }
    }

    pub async fn get_valid_token(&self) -> Result<String, CallError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if token.expires_at - self.skew > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.source.fetch().await?;
        debug!("Refreshed access token, valid until {}", fresh.expires_at);
        let value = fresh.value.clone();
        *current = Some(fresh);
        Ok(value)
    }
}

pub struct OAuthRefreshSource {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl OAuthRefreshSource {
    pub fn new(
        client: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret,
            refresh_token,
        }
    }
}

#[async_trait]
impl TokenSource for OAuthRefreshSource {
    async fn fetch(&self) -> Result<AccessToken, CallError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CallError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CallError::Transient(format!("token endpoint returned {}", status)));
        }
        if !status.is_success() {
            return Err(CallError::Permanent(format!("token endpoint returned {}", status)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CallError::Transient(e.to_string()))?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}
