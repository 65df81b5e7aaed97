use async_trait::async_trait;
use chrono_tz::Tz;
use futures::future::join_all;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::json;
use shared::BookingNotification;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::retry::{CallError, RetryPolicy};
use crate::token::{TokenCache, TokenSource};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &BookingNotification) -> Result<(), CallError>;
}

pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn notify(&self, notification: &BookingNotification) -> Result<(), CallError> {
        let json = serde_json::to_string(notification).map_err(|e| CallError::Permanent(e.to_string()))?;
        let key = notification.aggregate_id().to_string();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| CallError::Transient(format!("Failed to publish notification: {}", e)))?;

        Ok(())
    }
}

pub struct CalendarNotifier<S> {
    client: reqwest::Client,
    events_url: String,
    timezone: Tz,
    tokens: Arc<TokenCache<S>>,
}

impl<S: TokenSource> CalendarNotifier<S> {
    pub fn new(client: reqwest::Client, api_base: &str, calendar_id: &str, timezone: Tz, tokens: Arc<TokenCache<S>>) -> Self {
        Self {
            client,
            events_url: format!("{}/calendars/{}/events", api_base.trim_end_matches('/'), calendar_id),
            timezone,
            tokens,
        }
    }

    fn event_body(&self, notification: &BookingNotification) -> serde_json::Value {
        match notification {
            BookingNotification::Confirmed {
                public_id,
                service_type,
                slot_start,
                slot_end,
                customer_name,
                customer_phone,
                address,
                vehicle_plate,
                ..
            } => json!({
                "summary": format!("{} - {} ({})", service_type, customer_name, public_id),
                "location": address,
                "description": format!(
                    "Customer phone: {}\nVehicle: {}",
                    customer_phone,
                    vehicle_plate.as_deref().unwrap_or("not given")
                ),
                "start": {
                    "dateTime": slot_start.with_timezone(&self.timezone).to_rfc3339(),
                    "timeZone": self.timezone.name(),
                },
                "end": {
                    "dateTime": slot_end.with_timezone(&self.timezone).to_rfc3339(),
                    "timeZone": self.timezone.name(),
                },
            }),
        }
    }
}

#[async_trait]
impl<S: TokenSource + 'static> Notifier for CalendarNotifier<S> {
    fn name(&self) -> &'static str {
        "calendar"
    }

    async fn notify(&self, notification: &BookingNotification) -> Result<(), CallError> {
        let token = self.tokens.get_valid_token().await?;
        let response = self
            .client
            .post(&self.events_url)
            .bearer_auth(token)
            .json(&self.event_body(notification))
            .send()
            .await
            .map_err(|e| CallError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(CallError::Transient(format!("calendar returned {}", status)))
        } else {
            Err(CallError::Permanent(format!("calendar returned {}", status)))
        }
    }
}

/// Best-effort fan-out. Failures are logged and counted, never raised.
#[derive(Clone)]
pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, retry: RetryPolicy) -> Self {
        Self { notifiers, retry }
    }

    pub async fn dispatch(&self, notification: &BookingNotification) -> usize {
        let results = join_all(self.notifiers.iter().map(|notifier| async move {
            let outcome = self
                .retry
                .run(notifier.name(), || notifier.notify(notification))
                .await;
            (notifier.name(), outcome)
        }))
        .await;

        let mut failed = 0;
        for (name, outcome) in results {
            match outcome {
                Ok(()) => info!("Sent {} notification for {}", name, notification.public_id()),
                Err(e) => {
                    failed += 1;
                    error!(
                        public_id = notification.public_id(),
                        notifier = name,
                        "Notification failed, booking stays confirmed: {}",
                        e
                    );
                }
            }
        }
        failed
    }
}
