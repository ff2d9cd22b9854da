use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::pipeline::cancel::CancelToken;

type Classifier = Arc<dyn Fn(&Error) -> ErrorClass + Send + Sync>;

/// How a failed transformation call is treated by [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Backend over capacity or rate limited. Waited out without consuming
    /// an attempt.
    Capacity,
    /// Ordinary failure. Consumes one attempt.
    Attempt,
    /// Never retried.
    Fatal,
}

/// Per-chunk retry policy.
///
/// Ordinary errors consume one of `max_attempts`. Capacity errors wait a fixed
/// delay plus random jitter and retry for free, up to `max_capacity_waits`
/// waits per call, so a permanently saturated backend still terminates.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Option<Duration>,
    capacity_delay: Duration,
    capacity_jitter: Duration,
    max_capacity_waits: u32,
    classify: Classifier,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: None,
            capacity_delay: Duration::from_secs(5),
            capacity_jitter: Duration::from_secs(5),
            max_capacity_waits: 32,
            classify: Arc::new(default_classify),
        }
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.jitter = Some(max_jitter);
        self
    }

    pub fn capacity_delay(mut self, delay: Duration, max_jitter: Duration) -> Self {
        self.capacity_delay = delay;
        self.capacity_jitter = max_jitter;
        self
    }

    pub fn max_capacity_waits(mut self, waits: u32) -> Self {
        self.max_capacity_waits = waits;
        self
    }

    /// Replace the error classifier.
    pub fn classify_with<F>(mut self, classify: F) -> Self
    where
        F: Fn(&Error) -> ErrorClass + Send + Sync + 'static,
    {
        self.classify = Arc::new(classify);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, error: &Error) -> ErrorClass {
        (self.classify)(error)
    }

    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let mut delay = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        delay = delay.min(self.max_delay);

        if let Some(max_jitter) = self.jitter {
            delay = delay.saturating_add(random_up_to(max_jitter)).min(self.max_delay);
        }

        delay
    }

    pub(crate) fn capacity_wait(&self) -> Duration {
        self.capacity_delay
            .saturating_add(random_up_to(self.capacity_jitter))
    }

    /// Run `op` until it succeeds, fails fatally, or the policy gives up.
    ///
    /// `cancel` interrupts backoff sleeps; an interrupted call returns
    /// `Error::Cancelled`.
    pub async fn run<T, F, Fut>(&self, stage: &'static str, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        let mut capacity_waits = 0u32;

        loop {
            if cancel.is_cancelled() {
                tracing::event!(
                    tracing::Level::DEBUG,
                    event = "transpipe.cancelled",
                    stage = stage,
                    where_ = "attempt",
                    "transpipe.cancelled"
                );
                return Err(Error::Cancelled);
            }

            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let class = if error.is_cancelled() {
                ErrorClass::Fatal
            } else {
                self.classify(&error)
            };

            let delay = match class {
                ErrorClass::Fatal => return Err(error),
                ErrorClass::Capacity if capacity_waits < self.max_capacity_waits => {
                    capacity_waits += 1;
                    let delay = self.capacity_wait();
                    tracing::event!(
                        tracing::Level::WARN,
                        event = "transpipe.retry.capacity_wait",
                        stage = stage,
                        waits = capacity_waits,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transpipe.retry.capacity_wait"
                    );
                    delay
                }
                ErrorClass::Capacity => {
                    tracing::event!(
                        tracing::Level::ERROR,
                        event = "transpipe.retry.exhausted",
                        stage = stage,
                        capacity_waits = capacity_waits,
                        error = %error,
                        "transpipe.retry.exhausted"
                    );
                    return Err(Error::retry_exhausted(stage, attempt, error));
                }
                ErrorClass::Attempt => {
                    tracing::event!(
                        tracing::Level::WARN,
                        event = "transpipe.retry.attempt_failed",
                        stage = stage,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "transpipe.retry.attempt_failed"
                    );
                    if attempt >= self.max_attempts {
                        tracing::event!(
                            tracing::Level::ERROR,
                            event = "transpipe.retry.exhausted",
                            stage = stage,
                            attempts = self.max_attempts,
                            error = %error,
                            "transpipe.retry.exhausted"
                        );
                        return Err(Error::retry_exhausted(stage, attempt, error));
                    }
                    let delay = self.backoff_delay(attempt);
                    attempt += 1;
                    delay
                }
            };

            if !delay.is_zero() {
                tracing::event!(
                    tracing::Level::DEBUG,
                    event = "transpipe.retry.sleep",
                    stage = stage,
                    delay_ms = delay.as_millis() as u64,
                    "transpipe.retry.sleep"
                );
            }
            cancel.sleep(delay).await?;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(6)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("capacity_delay", &self.capacity_delay)
            .field("max_capacity_waits", &self.max_capacity_waits)
            .finish_non_exhaustive()
    }
}

/// Per-record retry budget.
///
/// Each credit re-attempts every message of a record that still lacks a
/// transformation. Between credits the worker sleeps a random delay below
/// `max_backoff`.
#[derive(Debug, Clone)]
pub struct CreditPolicy {
    credits: u32,
    max_backoff: Duration,
}

impl CreditPolicy {
    pub fn new(credits: u32) -> Self {
        Self {
            credits: credits.max(1),
            max_backoff: Duration::from_secs(10),
        }
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn credits(&self) -> u32 {
        self.credits
    }

    pub fn backoff(&self) -> Duration {
        random_up_to(self.max_backoff)
    }
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Default classification: capacity signals from backends are free retries,
/// configuration and token-counting failures are fatal, everything else costs
/// an attempt.
pub fn default_classify(error: &Error) -> ErrorClass {
    match error {
        Error::Backend { .. } if error.is_capacity() => ErrorClass::Capacity,
        Error::TokenCounter(_) | Error::InvalidBudget(_) | Error::Config(_) | Error::Cancelled => {
            ErrorClass::Fatal
        }
        _ => ErrorClass::Attempt,
    }
}

fn random_up_to(max: Duration) -> Duration {
    let nanos = max.as_nanos().min(u128::from(u64::MAX)) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..=nanos))
}
