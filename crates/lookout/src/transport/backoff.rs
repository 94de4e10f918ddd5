//! Reconnect scheduling for the media transport.
//!
//! Failure n (1-based) waits `min(base * growth^(n-1), cap)`. Once
//! `max_attempts` consecutive failures pile up the policy backs off to one
//! long reset delay and starts counting from zero again, so a dead source is
//! retried slowly forever instead of being abandoned.

use std::time::Duration;

use lookoutconf::TransportConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    base: Duration,
    growth: f64,
    cap: Duration,
    max_attempts: u32,
    reset_delay: Duration,
    attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for ReconnectPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            base: Duration::from_millis(config.reconnect_base_ms),
            growth: config.reconnect_growth.max(1.0),
            cap: Duration::from_millis(config.reconnect_cap_ms),
            max_attempts: config.max_reconnect_attempts.max(1),
            reset_delay: Duration::from_millis(config.reconnect_reset_ms),
            attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Consecutive failures since the last success or reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before reconnect attempt `attempt` (1-based), ignoring the reset.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.growth.powi(attempt.saturating_sub(1).min(64) as i32);
        let millis = (self.base.as_millis() as f64 * factor).min(self.cap.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn on_failure(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            self.attempts = 0;
            return self.reset_delay;
        }
        self.delay_for_attempt(self.attempts)
    }

    pub fn on_success(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(3_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_500));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10_125));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(15));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(15));
    }

    #[test]
    fn test_eighth_failure_schedules_reset() {
        let mut policy = ReconnectPolicy::default();
        for n in 1..8 {
            let delay = policy.on_failure();
            assert_eq!(delay, policy.delay_for_attempt(n));
            assert_eq!(policy.attempts(), n);
        }
        assert_eq!(policy.on_failure(), Duration::from_secs(30));
        assert_eq!(policy.attempts(), 0);

        // Next cycle starts over
        assert_eq!(policy.on_failure(), Duration::from_secs(2));
    }

    #[test]
    fn test_success_resets() {
        let mut policy = ReconnectPolicy::default();
        policy.on_failure();
        policy.on_failure();
        policy.on_success();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.on_failure(), Duration::from_secs(2));
    }
}
