//! Circuit Breaker (§4.7): a three-state failure-isolation device that
//! short-circuits requests to an unhealthy upstream.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::metrics::{MetricEvent, MetricsCollector};
use std::sync::Arc;

/// The three states a circuit breaker can be in. Sealed per spec.md §9
/// (exhaustively matched, closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for a circuit breaker instance. Immutable value type
/// with `with_*`-style consuming builder methods, matching the rest of
/// the crate's configuration surface.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub const fn new() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.failure_threshold < 1 {
            return Err(Error::config("failureThreshold must be >= 1"));
        }
        if self.half_open_success_threshold < 1 {
            return Err(Error::config("halfOpenSuccessThreshold must be >= 1"));
        }
        Ok(())
    }

    /// Balanced defaults: 5 failures to open, 30s recovery, 2 consecutive
    /// successes to close.
    pub const fn defaults() -> Self {
        CircuitBreakerConfig::new()
    }

    /// Trips faster and recovers slower than `defaults`, for dependencies
    /// with low failure tolerance.
    pub const fn strict() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_success_threshold: 3,
        }
    }

    /// Trips slower and recovers faster, for flaky-but-usually-fine
    /// dependencies.
    pub const fn lenient() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(15),
            half_open_success_threshold: 1,
        }
    }

    /// Tuned for a 99.9% SLA target.
    pub const fn sla999() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(20),
            half_open_success_threshold: 2,
        }
    }

    /// Tuned for a 99.99% SLA target: trips sooner, probes sooner.
    pub const fn sla9999() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(10),
            half_open_success_threshold: 2,
        }
    }

    /// Most aggressive preset: trips on the first couple of failures and
    /// probes almost immediately, for high-availability paths where a
    /// failing dependency must be isolated fast.
    pub const fn high_availability() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(5),
            half_open_success_threshold: 1,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_half_open_successes: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
}

/// A circuit breaker guarding one logical upstream dependency. May be
/// shared across concurrent handlers; state transitions are serialized
/// by an internal mutex around a short critical section.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_half_open_successes: 0,
                last_failure_time: None,
                opened_at: None,
            }),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Whether a request may proceed right now. Non-throwing; transitions
    /// Open -> HalfOpen when `recoveryTimeout` has elapsed since opening.
    pub fn allows_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut inner);
        !matches!(inner.state, CircuitState::Open)
    }

    /// Like `allows_request` but returns `Err(CircuitBreakerOpen)` when
    /// the circuit refuses, carrying the remaining recovery time.
    pub fn check_state(&self) -> crate::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut inner);
        if inner.state == CircuitState::Open {
            let recovery_time = inner
                .opened_at
                .map(|opened| {
                    let elapsed = opened.elapsed();
                    self.config.recovery_timeout.saturating_sub(elapsed)
                })
                .unwrap_or(self.config.recovery_timeout);
            return Err(Error::circuit_breaker_open(recovery_time));
        }
        Ok(())
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    self.transition(inner, CircuitState::HalfOpen);
                }
            }
        }
    }

    /// Record a successful call. In `Closed`, resets the failure counter.
    /// In `HalfOpen`, advances the probe counter and closes the circuit
    /// once `halfOpenSuccessThreshold` consecutive successes are seen.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_half_open_successes += 1;
                if inner.consecutive_half_open_successes >= self.config.half_open_success_threshold
                {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.consecutive_half_open_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. In `Closed`, increments the failure counter
    /// and opens the circuit at `failureThreshold`. In `HalfOpen`, any
    /// failure immediately re-opens the circuit, re-arming the recovery
    /// timeout.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                inner.consecutive_half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Reset to `Closed` with all counters zeroed, discarding any
    /// in-progress recovery window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_half_open_successes = 0;
        inner.last_failure_time = None;
        inner.opened_at = None;
    }

    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        let previous = inner.state;
        if previous == new_state {
            return;
        }
        inner.state = new_state;
        if new_state == CircuitState::Open {
            inner.opened_at = Some(Instant::now());
        }
        if let Some(metrics) = &self.metrics {
            metrics.emit(MetricEvent::CircuitBreakerStateChange {
                circuit_name: self.name.clone(),
                previous_state: previous,
                new_state,
                failure_count: Some(inner.consecutive_failures),
                timestamp_ms: 0,
                request_id: None,
            });
        }
    }
}
