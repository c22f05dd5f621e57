/// Backoff Module
///
/// Exponential backoff with jitter for retrying transient fetch and save errors.
use rand::Rng;
use std::time::Duration;

/// Jitter applied to each delay, as a fraction of the un-jittered delay.
/// Kept below one third so consecutive delays never shrink.
const DEFAULT_JITTER: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, jitter: DEFAULT_JITTER }
    }

    /// Same curve without randomness
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay to wait after the failed attempt number `attempt` (0-based):
    /// `base * 2^attempt ± jitter`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        if self.jitter <= 0.0 || exponential.is_zero() {
            return exponential.min(self.max);
        }

        // Jitter before capping so a capped delay never undercuts the previous one.
        let secs = exponential.as_secs_f64();
        let spread = secs * self.jitter;
        let jittered = rand::thread_rng().gen_range(secs - spread..=secs + spread);

        Duration::from_secs_f64(jittered.min(self.max.as_secs_f64()))
    }
}
