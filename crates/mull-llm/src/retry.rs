use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{ChatModel, ChatResponse, GenerateOptions, StreamChunk};
use mull_core::{Message, Result};

/// Maximum retry attempts for transient errors (429, 500, 502, 503).
const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff (doubles each retry).
const BASE_DELAY_MS: u64 = 1000;
/// Ceiling on a computed backoff delay.
const MAX_DELAY_MS: u64 = 60_000;

/// Middleware that retries a model on errors it classifies as retryable.
/// Non-retryable errors pass straight through.
pub struct RetryingModel {
    inner: Arc<dyn ChatModel>,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryingModel {
    pub fn new(inner: Arc<dyn ChatModel>) -> Self {
        Self {
            inner,
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (0-based), honouring retry-after hints.
    /// Computed delays saturate at one minute.
    pub fn backoff(&self, attempt: u32, err: &mull_core::MullError) -> Duration {
        let ceiling = Duration::from_millis(MAX_DELAY_MS);
        err.retry_after_secs()
            .map(Duration::from_secs)
            .unwrap_or_else(|| {
                2u32.checked_pow(attempt)
                    .and_then(|factor| self.base_delay.checked_mul(factor))
                    .map_or(ceiling, |delay| delay.min(ceiling))
            })
    }
}

#[async_trait]
impl ChatModel for RetryingModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChatResponse> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(messages, options).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt, &e);
                    warn!(
                        model = self.inner.name(),
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let mut attempt = 0;
        loop {
            match self.inner.stream(messages, options).await {
                Ok(rx) => return Ok(rx),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt, &e);
                    warn!(
                        model = self.inner.name(),
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying stream after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
