use chrono::{DateTime, Utc};
use shared::BookingResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::store::ReservationStore;

pub struct ExpirySweeper {
    store: Arc<dyn ReservationStore>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn ReservationStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_at(Utc::now()).await {
                error!("Error expiring stale payment holds: {}", e);
            }
        }
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> BookingResult<usize> {
        let expired = self.store.expire_stale(now).await?;
        for reservation in &expired {
            info!("Expired unpaid booking {} ({})", reservation.public_id, reservation.slot.start);
        }
        Ok(expired.len())
    }
}
