//! Retry policy, the clock it sleeps on, and the per-request state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use reqwest::Method;

/// Default number of attempts (first try included) for idempotent requests.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry.
/// 500ms rides out a dropped connection without making the user wait.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound for a single backoff step, before jitter.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// Spread applied to every delay, as a fraction of it.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Only these methods are retried after a transient network failure.
/// State-changing calls keep at-most-once semantics.
pub fn is_retryable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 disables jitter; 0.2 spreads each delay over ±20%.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Exponential delay after `failed_attempts` failures, capped, without jitter.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff with jitter applied.
    pub fn delay_for<R: Rng>(&self, failed_attempts: u32, rng: &mut R) -> Duration {
        let base = self.backoff(failed_attempts);
        let jitter = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        base.mul_f64(rng.gen_range((1.0 - jitter)..=(1.0 + jitter)))
    }
}

/// Time source for backoff sleeps and credential expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Lifecycle of one logical request.
///
/// `Building -> Sent -> {Succeeded | Retrying -> Sent | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Building,
    Sent { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempt: u32 },
    Failed { attempt: u32 },
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded { .. } | RequestState::Failed { .. })
    }
}
