use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::errors::ServiceError;
use crate::utils::Metrics;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls fail fast with `ServiceError::CircuitOpen`
    Open,
    /// One probe call is let through to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive retryable failures before opening
    pub failure_threshold: usize,
    /// How long to stay open before probing
    pub cooldown: Duration,
    /// Consecutive probe successes needed to close again
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// Per-collaborator circuit breaker.
///
/// Only retryable failures (timeouts, 5xx, rate limits, transport errors) count
/// against the service. A 400 or 404 is a healthy service answering a bad
/// request, so it resets the failure streak like a success does.
#[derive(Clone)]
pub struct CircuitBreaker {
    service: Arc<str>,
    inner: Arc<RwLock<CircuitBreakerInner>>,
    config: CircuitBreakerConfig,
    metrics: Option<Metrics>,
}

struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    opened_at: Option<Instant>,
    /// Set while a half-open probe is outstanding
    probe_started: Option<Instant>,
    total_failures: usize,
    total_successes: usize,
}

impl CircuitBreaker {
    pub fn new(service: &str) -> Self {
        Self::with_config(service, CircuitBreakerConfig::default())
    }

    pub fn with_config(service: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            service: Arc::from(service),
            inner: Arc::new(RwLock::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_started: None,
                total_failures: 0,
                total_successes: 0,
            })),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Admit a call or fail fast
    pub fn guard(&self) -> Result<(), ServiceError> {
        let mut inner = self.inner.write();

        let admitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!("Circuit for {} half-open, sending probe", self.service);
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.probe_started = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            // A probe abandoned without an outcome expires after one cooldown
            CircuitState::HalfOpen => match inner.probe_started {
                Some(started) if started.elapsed() < self.config.cooldown => false,
                _ => {
                    inner.probe_started = Some(Instant::now());
                    true
                }
            },
        };

        if admitted {
            Ok(())
        } else {
            Err(ServiceError::CircuitOpen {
                service: self.service.to_string(),
            })
        }
    }

    /// Feed the outcome of an admitted call back into the breaker
    pub fn record<T>(&self, outcome: &Result<T, ServiceError>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(e) if e.is_retryable() => self.record_failure(),
            Err(ServiceError::Cancelled) => self.inner.write().probe_started = None,
            Err(_) => self.record_success(),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        inner.probe_started = None;

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    info!("Circuit for {} closed, service recovered", self.service);
                    inner.state = CircuitState::Closed;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        inner.total_failures += 1;
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;
        inner.probe_started = None;

        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            warn!(
                "Circuit for {} opened after {} consecutive failures",
                self.service, inner.consecutive_failures
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            if let Some(ref m) = self.metrics {
                m.record_circuit_breaker_trip();
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read();
        CircuitBreakerStats {
            service: self.service.to_string(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
        inner.probe_started = None;
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub total_failures: usize,
    pub total_successes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::with_config(
            "market-search",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown,
                success_threshold: 2,
            },
        )
    }

    #[test]
    fn test_opens_after_retryable_failures() {
        let breaker = breaker(3, Duration::from_secs(60));
        let timeout: Result<(), _> = Err(ServiceError::Timeout(Duration::from_secs(1)));

        breaker.record(&timeout);
        breaker.record(&timeout);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record(&timeout);
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(matches!(
            breaker.guard(),
            Err(ServiceError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_not_found_does_not_trip() {
        let breaker = breaker(2, Duration::from_secs(60));
        let not_found: Result<(), _> = Err(ServiceError::NotFound("sku".into()));
        for _ in 0..5 {
            breaker.record(&not_found);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.guard().is_ok());
    }

    #[test]
    fn test_half_open_admits_single_probe_then_recovers() {
        let breaker = breaker(1, Duration::from_millis(20));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(40));

        assert!(breaker.guard().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Second caller is held back while the probe is outstanding
        assert!(breaker.guard().is_err());

        breaker.record_success();
        assert!(breaker.guard().is_ok());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = breaker(1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(breaker.guard().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
