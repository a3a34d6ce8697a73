//! Politeness delays between upstream requests.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Longest single wait a configuration may ask for: one day.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThrottleError {
    #[error("delay bounds must be finite and non-negative (got {min_secs}..{max_secs})")]
    Negative { min_secs: f64, max_secs: f64 },
    #[error("delay minimum {min_secs}s exceeds maximum {max_secs}s")]
    Inverted { min_secs: f64, max_secs: f64 },
    #[error("delay bound {secs}s is longer than {max}s", max = MAX_DELAY_SECS)]
    TooLong { secs: f64 },
}

/// Inclusive bounds, in seconds, of a uniformly random wait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min_secs: 0.0,
        max_secs: 0.0,
    };

    pub fn new(min_secs: f64, max_secs: f64) -> Result<Self, ThrottleError> {
        let range = Self { min_secs, max_secs };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), ThrottleError> {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !valid(self.min_secs) || !valid(self.max_secs) {
            return Err(ThrottleError::Negative {
                min_secs: self.min_secs,
                max_secs: self.max_secs,
            });
        }
        if self.max_secs > MAX_DELAY_SECS {
            return Err(ThrottleError::TooLong {
                secs: self.max_secs,
            });
        }
        if self.min_secs > self.max_secs {
            return Err(ThrottleError::Inverted {
                min_secs: self.min_secs,
                max_secs: self.max_secs,
            });
        }
        Ok(())
    }
}

/// Randomized pre/post-request waits and a fixed cooldown after failures.
///
/// There is no token bucket and no adaptive back-off.
#[derive(Debug)]
pub struct Throttle {
    pre_request: DelayRange,
    post_request: DelayRange,
    failure_cooldown: Duration,
    rng: StdRng,
}

impl Throttle {
    pub fn new(pre_request: DelayRange, post_request: DelayRange, failure_cooldown: Duration) -> Self {
        Self {
            pre_request,
            post_request,
            failure_cooldown,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sampling for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Zero waits everywhere except the given cooldown.
    pub fn immediate(failure_cooldown: Duration) -> Self {
        Self::new(DelayRange::ZERO, DelayRange::ZERO, failure_cooldown)
    }

    pub fn sample(&mut self, range: DelayRange) -> Duration {
        if range.max_secs <= range.min_secs {
            return delay_from_secs(range.min_secs);
        }
        delay_from_secs(self.rng.gen_range(range.min_secs..=range.max_secs))
    }

    /// Sleep a uniformly random duration within `range` and report it.
    pub async fn polite_delay(&mut self, range: DelayRange, reason: &'static str) -> Duration {
        let wait = self.sample(range);
        info!(wait_secs = %format_secs(wait), reason, "random wait");
        tokio::time::sleep(wait).await;
        wait
    }

    /// Sleep a fixed duration after a failed request.
    pub async fn cooldown(&mut self, duration: Duration) -> Duration {
        info!(wait_secs = %format_secs(duration), "cooling down after failure");
        tokio::time::sleep(duration).await;
        duration
    }

    pub async fn before_request(&mut self) -> Duration {
        self.polite_delay(self.pre_request, "pre-request delay").await
    }

    pub async fn after_request(&mut self) -> Duration {
        self.polite_delay(self.post_request, "post-request delay").await
    }

    pub async fn after_failure(&mut self) -> Duration {
        self.cooldown(self.failure_cooldown).await
    }
}

/// Convert seconds to a wait, clamped to `0..=MAX_DELAY_SECS`. NaN maps to zero.
pub fn delay_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}

fn format_secs(duration: Duration) -> String {
    format!("{:.1}", duration.as_secs_f64())
}
