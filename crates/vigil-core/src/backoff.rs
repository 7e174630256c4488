// ── Retry delay policy ──
//
// Pure functions only. Callers own their attempt counters and decide
// when to sleep, which keeps the policy testable without a runtime.

use std::time::Duration;

/// Exponential backoff: `min(base * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Capture-service start/stop retries.
    pub const fn control_plane() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Live stream reconnects.
    pub const fn streaming() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Poll interval growth while nothing changes.
    pub const fn polling() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// Saturates instead of overflowing, so any attempt count is safe.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// `true` once `attempt` (zero-based) was the last one allowed.
    pub fn should_give_up(&self, attempt: u32, max_attempts: u32) -> bool {
        attempt.saturating_add(1) >= max_attempts
    }

    /// [`next_delay`](Self::next_delay) scaled into `[0.75, 1.0]` of itself.
    ///
    /// The factor is derived from the attempt number, so the sequence is
    /// reproducible in tests while still spreading reconnects from many
    /// clients. Never exceeds `cap`.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let factor = 0.875 + 0.125 * (f64::from(attempt) * 7.3).sin();
        self.next_delay(attempt).mul_f64(factor.clamp(0.75, 1.0))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::control_plane()
    }
}
