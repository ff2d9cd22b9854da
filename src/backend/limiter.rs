use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::pipeline::cancel::CancelToken;

/// Token bucket shared by every worker calling one backend.
///
/// The bucket refills continuously at `rate` tokens per second up to `burst`
/// tokens. State only changes inside the mutex, so concurrent acquirers never
/// both take the last token.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Limiter allowing `rate` calls per second with a burst of one.
    pub fn new(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::config(format!(
                "rate limit must be a positive number of calls per second, got {rate}"
            )));
        }
        Ok(Self {
            rate,
            burst: 1.0,
            state: Mutex::new(BucketState {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = f64::from(burst.max(1));
        self.state.get_mut().tokens = self.burst;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Take one token now, or report how long until one is available.
    pub fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
        }
    }

    /// Wait for a token, or fail with `Error::Cancelled` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<()> {
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => cancel.sleep(wait).await?,
            }
        }
    }
}
