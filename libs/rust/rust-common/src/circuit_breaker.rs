//! Circuit breaker guarding calls to shared infrastructure.
//!
//! The breaker is synchronous: its lock is never held across an `.await`, so
//! callers check [`CircuitBreaker::allow_request`] before issuing a call and
//! report the outcome afterwards.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without reaching the dependency
    Open,
    /// A limited number of probe requests are allowed
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive probe successes before the circuit closes again
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_timeout: Duration,
    /// Probe requests admitted while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold.
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open-state timeout.
    #[must_use]
    pub const fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }
}

#[derive(Debug)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { admitted: u32, successes: u32 },
}

/// Circuit breaker for a single downstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for the named dependency.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            phase: Mutex::new(Phase::Closed { failures: 0 }),
        }
    }

    /// Name of the guarded dependency.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request may proceed right now.
    pub fn allow_request(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { .. } => true,
            Phase::Open { since } => {
                if since.elapsed() >= self.config.open_timeout {
                    *phase = Phase::HalfOpen {
                        admitted: 1,
                        successes: 0,
                    };
                    true
                } else {
                    false
                }
            }
            Phase::HalfOpen {
                ref mut admitted, ..
            } => {
                if *admitted < self.config.half_open_max_requests {
                    *admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { ref mut failures } => *failures = 0,
            Phase::HalfOpen {
                ref mut successes, ..
            } => {
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    tracing::info!(dependency = %self.name, "circuit closed");
                    *phase = Phase::Closed { failures: 0 };
                }
            }
            Phase::Open { .. } => {}
        }
    }

    /// Report a failed call.
    pub fn record_failure(&self) {
        let mut phase = self.phase.lock();
        let open = match *phase {
            Phase::Closed { ref mut failures } => {
                *failures += 1;
                *failures >= self.config.failure_threshold
            }
            Phase::HalfOpen { .. } => true,
            Phase::Open { .. } => false,
        };
        if open {
            tracing::warn!(dependency = %self.name, "circuit opened");
            *phase = Phase::Open {
                since: Instant::now(),
            };
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match *self.phase.lock() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}
