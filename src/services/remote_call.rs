// Retry, deadline and provider fallback around a single outbound call

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::RetryConfig;
use crate::core::errors::{ServiceError, ServiceResult};
use crate::middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::utils::{Metrics, Sleeper, TokioSleeper};

/// Attempt budget and per-attempt deadline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_delay, config.default_timeout)
    }

    /// Pause after failed attempt `attempt` (1-based): `base_delay * 2^(attempt-1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000), Duration::from_secs(30))
    }
}

/// Wraps outbound calls with a deadline, classified retries and fail-fast breakers.
///
/// Breakers are keyed by the service name passed to [`call`](Self::call), so one
/// executor (and its clones) can front every collaborator while each keeps its
/// own health state.
#[derive(Clone)]
pub struct RemoteCallExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    breaker_config: Option<CircuitBreakerConfig>,
    breakers: Arc<DashMap<String, CircuitBreaker>>,
    metrics: Option<Metrics>,
}

impl RemoteCallExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            breaker_config: None,
            breakers: Arc::new(DashMap::new()),
            metrics: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_circuit_breakers(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = Some(config);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Same retry budget and shared breakers, different per-attempt deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut executor = self.clone();
        executor.policy.timeout = timeout;
        executor
    }

    pub fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    fn breaker_for(&self, service: &str) -> Option<CircuitBreaker> {
        let config = self.breaker_config.as_ref()?;
        let breaker = self
            .breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let breaker = CircuitBreaker::with_config(service, config.clone());
                match self.metrics {
                    Some(ref m) => breaker.with_metrics(m.clone()),
                    None => breaker,
                }
            })
            .clone();
        Some(breaker)
    }

    /// Run `operation` until it succeeds, fails non-retryably, or the attempt budget is spent
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.attempts()))]
    pub async fn call<T, F, Fut>(&self, service: &str, mut operation: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let attempts = self.policy.attempts();
        let breaker = self.breaker_for(service);
        let mut attempt = 1;

        loop {
            if let Some(ref breaker) = breaker {
                if let Err(e) = breaker.guard() {
                    warn!("{} unavailable, failing fast: {}", service, e);
                    return Err(e);
                }
            }

            let start = Instant::now();
            let outcome = match tokio::time::timeout(self.policy.timeout, operation()).await {
                Ok(Err(ServiceError::Timeout(d))) if d.is_zero() => {
                    Err(ServiceError::Timeout(self.policy.timeout))
                }
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.policy.timeout)),
            };

            if let Some(ref breaker) = breaker {
                breaker.record(&outcome);
            }
            if let Some(ref m) = self.metrics {
                m.record_remote_call(outcome.is_ok(), start.elapsed());
            }

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.policy.backoff_delay(attempt);
                    debug!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        service, attempt, attempts, e, delay
                    );
                    if let Some(ref m) = self.metrics {
                        m.record_retry();
                    }
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("{} failed after {} attempts: {}", service, attempt, e);
                    } else {
                        debug!("{} failed with non-retryable error: {}", service, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Try providers in declared order, each with the full retry policy.
    ///
    /// Returns the first success together with the name of the provider that
    /// answered. When every provider fails, the last provider's error is returned.
    pub async fn call_with_fallback<P, T, F, Fut>(
        &self,
        providers: &[(String, P)],
        mut operation: F,
    ) -> ServiceResult<(T, String)>
    where
        P: Clone,
        F: FnMut(P) -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let mut last_error = ServiceError::Validation("no providers configured".to_string());

        for (index, (name, provider)) in providers.iter().enumerate() {
            match self.call(name, || operation(provider.clone())).await {
                Ok(value) => {
                    if index > 0 {
                        debug!("Fallback provider {} answered", name);
                    }
                    return Ok((value, name.clone()));
                }
                Err(ServiceError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    if index + 1 < providers.len() {
                        warn!("Provider {} failed ({}), trying next provider", name, e);
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
