//! Circuit Breaker Implementation
//! Fails fast when the market data gateway is unhealthy so that price lookups
//! degrade to "unavailable" without waiting out a timeout per symbol.

use crate::observability::metrics::metrics;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    fn gauge_value(self) -> f64 {
        match self {
            CircuitBreakerState::Closed => 0.0,
            CircuitBreakerState::HalfOpen => 0.5,
            CircuitBreakerState::Open => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// How long the breaker stays open before probing
    pub timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "market_data".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    /// When the breaker opened, or when the current probe round started
    opened_at: Option<Instant>,
}

/// Critical sections never await, so a std mutex serves both the async and
/// the blocking price paths.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    /// Check if circuit allows a call
    pub fn allow_call(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.timeout {
                    self.transition(&mut inner, CircuitBreakerState::HalfOpen);
                    Self::start_probe_round(&mut inner);
                    true
                } else {
                    false
                }
            }
            CircuitBreakerState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else if inner
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.config.timeout)
                {
                    // Probes from the last round never reported back
                    warn!(name = %self.config.name, "Half-open probes expired, probing again");
                    Self::start_probe_round(&mut inner);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Admit one call. The permit settles the outcome; a permit dropped
    /// unsettled (the call was abandoned or aborted) counts as a failure.
    pub fn try_call(&self) -> Option<CallPermit<'_>> {
        self.allow_call().then(|| CallPermit {
            breaker: self,
            settled: false,
        })
    }

    fn start_probe_round(inner: &mut BreakerInner) {
        inner.half_open_calls = 1;
        inner.success_count = 0;
        inner.opened_at = Some(Instant::now());
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count = 0;
            }
            CircuitBreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitBreakerState::Closed);
                }
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => {
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
                self.transition(&mut inner, CircuitBreakerState::Open);
            }
            CircuitBreakerState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitBreakerState) {
        let previous = inner.state;
        inner.state = next;

        match next {
            CircuitBreakerState::Open => warn!(
                name = %self.config.name,
                failures = inner.failure_count,
                from = ?previous,
                "Circuit breaker opened"
            ),
            CircuitBreakerState::HalfOpen => {
                info!(name = %self.config.name, "Circuit breaker transitioning to half-open")
            }
            CircuitBreakerState::Closed => {
                info!(name = %self.config.name, "Circuit breaker closed after recovery")
            }
        }

        if let Some(m) = metrics() {
            m.gateway_circuit_state
                .with_label_values(&[&self.config.name])
                .set(next.gauge_value());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // State stays consistent even if a holder panicked mid-update
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One admitted call through a [`CircuitBreaker`]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(name = %self.breaker.name(), "Call abandoned before completing");
            self.breaker.record_failure();
        }
    }
}
