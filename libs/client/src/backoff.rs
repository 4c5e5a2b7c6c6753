//! Capped exponential backoff and circuit breaker for status polling

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay between polls while the server answers
    pub interval: Duration,
    /// Growth factor applied per consecutive failure
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Consecutive failures after which polling stops
    pub max_consecutive_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_consecutive_failures: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }

        let factor = self.multiplier.max(1.0).powi(failures.min(32) as i32);
        let millis = self.interval.as_millis() as f64 * factor;
        let max = self.max_delay.as_millis() as f64;

        Duration::from_millis(millis.min(max) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Too many consecutive failures; callers should stop polling
    Open,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: BackoffPolicy,
    consecutive_failures: u32,
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            state: CircuitState::Closed,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    /// Count a failure and return how long to wait before retrying
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.policy.max_consecutive_failures {
            self.state = CircuitState::Open;
        }
        self.policy.delay_for(self.consecutive_failures)
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for(self.consecutive_failures)
    }
}
