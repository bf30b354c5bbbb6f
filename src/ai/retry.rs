//! Retry decorator for any [`Completion`].
//!
//! # Retry Strategy
//!
//! - At most 3 attempts
//! - Fixed backoff schedule `[1s, 2s, 4s]`, indexed by the failed attempt
//! - Only errors for which [`AiError::is_transient`] holds are retried;
//!   permanent failures surface on the first attempt

use super::{AiError, Completion, TextStream};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

pub const BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

pub const MAX_ATTEMPTS: usize = 3;

/// Wraps a [`Completion`] and retries transient failures.
pub struct RetryCompletion<T> {
    inner: T,
    max_attempts: usize,
    delays: Vec<Duration>,
}

impl<T> RetryCompletion<T>
where
    T: Completion,
{
    /// The production policy: [`MAX_ATTEMPTS`] attempts on the [`BACKOFF`] schedule.
    pub fn standard(inner: T) -> Self {
        Self::new(inner, MAX_ATTEMPTS, BACKOFF.to_vec())
    }

    /// Custom policy. When `delays` is shorter than the number of retries the
    /// last delay repeats.
    pub fn new(inner: T, max_attempts: usize, delays: Vec<Duration>) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    fn delay_after(&self, attempt: usize) -> Duration {
        self.delays
            .get(attempt - 1)
            .or(self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    async fn run<R, F, Fut>(&self, op: &'static str, mut call: F) -> Result<R, AiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, AiError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match call().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() || attempt >= self.max_attempts {
                        error!(
                            op,
                            attempt,
                            max = self.max_attempts,
                            transient = e.is_transient(),
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "AI call gave up"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        op,
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "AI call attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryCompletion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCompletion")
            .field("max_attempts", &self.max_attempts)
            .field("delays", &self.delays)
            .finish()
    }
}

#[async_trait]
impl<T> Completion for RetryCompletion<T>
where
    T: Completion,
{
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        self.run("complete", || self.inner.complete(prompt)).await
    }

    /// Only opening the stream is retried; a failure mid-stream is delivered
    /// to the receiver.
    #[instrument(level = "info", skip_all)]
    async fn stream(&self, prompt: &str) -> Result<TextStream, AiError> {
        self.run("stream", || self.inner.stream(prompt)).await
    }
}
