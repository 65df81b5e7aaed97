use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(CallError::Permanent(e))) => return Err(CallError::Permanent(e)),
                Ok(Err(e)) => e,
                Err(_) => CallError::Transient(format!("timed out after {:?}", self.timeout)),
            };
            warn!("{} attempt {}/{} failed: {}", label, attempt, attempts, error);
            if attempt >= attempts {
                return Err(error);
            }
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}
