/// Exponential backoff with bounded multiplicative jitter
///
/// delay(attempt) = min(max_delay, base_delay × multiplier^attempt × jitter)
/// where jitter is drawn uniformly from `[jitter_min, jitter_max)` per call.
use rand::Rng;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry (attempt 0)
    pub base_delay: Duration,
    /// Upper bound applied after jitter
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Lower bound of the jitter factor (inclusive)
    pub jitter_min: f64,
    /// Upper bound of the jitter factor (exclusive)
    pub jitter_max: f64,
    /// Number of consecutive attempts after which scheduling stops
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
            jitter_min: 0.9,
            jitter_max: 1.1,
            max_attempts: 10,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            ..Default::default()
        }
    }

    /// Disable jitter (factor fixed at 1.0)
    pub fn without_jitter(mut self) -> Self {
        self.jitter_min = 1.0;
        self.jitter_max = 1.0;
        self
    }

    /// Whether another attempt may be scheduled after `attempt` failures
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay for `attempt` without jitter, capped at `max_delay`
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        self.scaled(attempt, 1.0)
    }

    /// Delay for `attempt` with a freshly drawn jitter factor
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.jitter_factor();
        let delay = self.scaled(attempt, factor);
        debug!(
            attempt,
            jitter = factor,
            delay_ms = delay.as_millis() as u64,
            "computed backoff delay"
        );
        delay
    }

    fn jitter_factor(&self) -> f64 {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        rand::thread_rng().gen_range(self.jitter_min..self.jitter_max)
    }

    fn scaled(&self, attempt: u32, factor: f64) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * exp * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        if !capped.is_finite() || capped < 0.0 {
            return self.max_delay;
        }
        Duration::from_millis(capped as u64)
    }
}
