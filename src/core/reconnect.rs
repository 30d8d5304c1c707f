use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng, rngs::SmallRng};

/// Pure reconnect decision logic.
///
/// Both methods are deterministic in the attempt counter so the policy can be
/// tested in isolation; jitter is applied by the connection manager at
/// scheduling time, never here.
pub trait ReconnectPolicy: Send + Sync + 'static {
    /// Delay before attempt `attempt` (1-based). Non-decreasing in `attempt`
    /// and bounded above.
    fn delay_for(&self, attempt: u32) -> Duration;

    /// Whether attempt `attempt` should be made at all.
    fn should_retry(&self, attempt: u32) -> bool;
}

/// Exponential backoff with an upper bound and an optional attempt cap.
///
/// The default never gives up: a consumer-facing client expects connectivity
/// to recover eventually, so retrying forever is the intended behavior.
/// Callers with a different SLA can cap attempts via [`with_max_attempts`].
///
/// [`with_max_attempts`]: ExponentialBackoff::with_max_attempts
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            1.5
        };
        Self {
            base,
            max,
            factor,
            max_attempts: None,
        }
    }

    /// Cap the number of attempts; unbounded by default.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 1.5)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.base.as_secs_f64() * self.factor.powi(exp);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }

    fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|cap| attempt <= cap)
    }
}

/// Retry bookkeeping owned by the connection manager.
///
/// Reset to zero on every successful connection and on explicit disconnect;
/// incremented before each scheduled attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub last_attempt_at: Option<Instant>,
}

impl RetryState {
    /// Record the start of the next attempt and return its 1-based number.
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(Instant::now());
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt_at = None;
    }
}

/// Full jitter over a computed backoff delay (0.5x..=1.0x).
///
/// Spreads simultaneous reconnect attempts from many clients after a
/// server-side blip.
pub fn jitter_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }

    let mut rng = SmallRng::from_entropy();
    let jitter: f64 = rng.gen_range(0.5..=1.0);
    let nanos = (base.as_nanos() as f64 * jitter) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
