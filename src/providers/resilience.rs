//! Circuit breaking for providers.
//!
//! Retries are deliberately absent here: the cascade already moves on to the
//! next provider, so a failing upstream only needs to be fenced off quickly.

use super::{ProviderClient, ProviderError, ProviderFuture, ProviderRequest};
use crate::config::ResilienceConfig;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
}

impl CircuitBreaker {
    fn new(config: &ResilienceConfig) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
        }
    }

    /// Admits or rejects a call, moving Open to `HalfOpen` once the reset
    /// timeout has elapsed.
    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen { attempts: 1 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    /// Same decision as [`Self::allow`] without consuming a half-open slot.
    fn would_allow(&self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => opened_at.elapsed() >= self.reset_timeout,
            BreakerState::HalfOpen { attempts } => attempts < self.half_open_max_calls,
        }
    }

    const fn on_success(&mut self) {
        self.state = BreakerState::Closed { failures: 0 };
    }

    /// Records a failure; returns true when this failure opened the circuit.
    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    /// Releases an admitted call that ended without an answer. A half-open
    /// trial reopens the circuit so the next trial waits a full reset period.
    fn on_abandoned(&mut self) {
        if matches!(self.state, BreakerState::HalfOpen { .. }) {
            self.state = BreakerState::Open {
                opened_at: Instant::now(),
            };
        }
    }

    const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }
}

/// An admitted call. Dropping it before [`Admission::settle`] (the caller's
/// deadline cancelled the future) returns the half-open slot.
struct Admission<'a, P: ProviderClient> {
    provider: &'a ResilientProvider<P>,
    settled: bool,
}

impl<P: ProviderClient> Admission<'_, P> {
    const fn settle(&mut self) {
        self.settled = true;
    }
}

impl<P: ProviderClient> Drop for Admission<'_, P> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let state = {
            let mut breaker = self
                .provider
                .breaker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            breaker.on_abandoned();
            breaker.state_value()
        };
        self.provider.record_breaker_state(state);
        tracing::debug!(provider = %self.provider.id, "Provider call cancelled before settling");
    }
}

/// Provider wrapper with a circuit breaker.
///
/// Timeouts count as failures, so the wrapper enforces the call deadline
/// itself instead of relying on the caller to drop the future.
pub struct ResilientProvider<P: ProviderClient> {
    id: String,
    inner: P,
    latency_slo: Duration,
    breaker: Mutex<CircuitBreaker>,
}

impl<P: ProviderClient> ResilientProvider<P> {
    /// Wraps `inner`, labelling metrics with `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, inner: P, config: &ResilienceConfig) -> Self {
        Self {
            id: id.into(),
            inner,
            latency_slo: Duration::from_millis(config.latency_slo_ms),
            breaker: Mutex::new(CircuitBreaker::new(config)),
        }
    }

    /// Returns the wrapped client.
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    /// Returns 0 (closed), 1 (open) or 2 (half-open).
    #[must_use]
    pub fn breaker_state(&self) -> u8 {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state_value()
    }

    async fn execute(
        &self,
        request: &ProviderRequest,
        deadline: Instant,
    ) -> Result<serde_json::Value, ProviderError> {
        let span = tracing::Span::current();

        let rejected_state = {
            let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
            if breaker.allow() {
                None
            } else {
                Some(breaker.state_value())
            }
        };
        if let Some(state) = rejected_state {
            self.record_breaker_state(state);
            span.record("status", "circuit_open");
            metrics::counter!("circuit_breaker_rejections_total", "provider" => self.id.clone())
                .increment(1);
            return Err(ProviderError::CircuitOpen);
        }

        let mut admission = Admission {
            provider: self,
            settled: false,
        };
        let started = Instant::now();
        let result = tokio::time::timeout_at(deadline, self.inner.invoke(request, deadline))
            .await
            .unwrap_or(Err(ProviderError::Timeout));
        let elapsed = started.elapsed();
        admission.settle();

        let (tripped, state) = {
            let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
            let tripped = if result.is_ok() {
                breaker.on_success();
                false
            } else {
                breaker.on_failure()
            };
            (tripped, breaker.state_value())
        };
        self.record_breaker_state(state);

        if let Err(err) = &result {
            span.record("status", if err.is_timeout() { "timeout" } else { "error" });
            span.record("error", tracing::field::display(err));
        } else {
            span.record("status", "success");
        }

        if !self.latency_slo.is_zero() && elapsed > self.latency_slo {
            metrics::counter!(
                "provider_latency_budget_exceeded_total",
                "provider" => self.id.clone()
            )
            .increment(1);
        }
        if tripped {
            metrics::counter!("circuit_breaker_trips_total", "provider" => self.id.clone())
                .increment(1);
            tracing::warn!(provider = %self.id, "Provider circuit breaker opened");
        }

        result
    }

    fn record_breaker_state(&self, state: u8) {
        metrics::gauge!("circuit_breaker_state", "provider" => self.id.clone())
            .set(f64::from(state));
    }
}

impl<P: ProviderClient> ProviderClient for ResilientProvider<P> {
    fn invoke<'a>(&'a self, request: &'a ProviderRequest, deadline: Instant) -> ProviderFuture<'a> {
        let span = tracing::info_span!(
            "provider.request",
            provider = %self.id,
            kind = self.inner.kind(),
            phase = %request.phase,
            status = tracing::field::Empty,
            error = tracing::field::Empty
        );
        Box::pin(self.execute(request, deadline).instrument(span))
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
            && self
                .breaker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .would_allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{StaticBehavior, StaticSource};
    use std::sync::Arc;

    fn config(threshold: u32, reset_ms: u64) -> ResilienceConfig {
        ResilienceConfig {
            breaker_failure_threshold: threshold,
            breaker_reset_ms: reset_ms,
            breaker_half_open_max_calls: 1,
            latency_slo_ms: 0,
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let source = Arc::new(StaticSource::failing("down", "503"));
        let provider = ResilientProvider::new("down", Arc::clone(&source), &config(2, 60_000));
        let request = ProviderRequest::new("t");

        assert!(provider.invoke(&request, deadline()).await.is_err());
        assert!(provider.is_available());
        assert!(provider.invoke(&request, deadline()).await.is_err());
        assert_eq!(provider.breaker_state(), 1);
        assert!(!provider.is_available());

        let err = provider.invoke(&request, deadline()).await.unwrap_err();
        assert_eq!(err, ProviderError::CircuitOpen);
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let source = Arc::new(StaticSource::new("flaky").with_behavior(StaticBehavior::FailFirst(1)));
        let provider = ResilientProvider::new("flaky", Arc::clone(&source), &config(1, 0));
        let request = ProviderRequest::new("t");

        assert!(provider.invoke(&request, deadline()).await.is_err());
        assert_eq!(provider.breaker_state(), 1);

        assert!(provider.invoke(&request, deadline()).await.is_ok());
        assert_eq!(provider.breaker_state(), 0);
    }

    #[test]
    fn test_abandoned_trial_reopens() {
        let mut breaker = CircuitBreaker::new(&config(1, 0));
        assert!(breaker.on_failure());
        assert!(breaker.allow());
        assert!(!breaker.would_allow());

        breaker.on_abandoned();
        assert_eq!(breaker.state_value(), 1);
        assert!(breaker.allow());
    }

    #[test]
    fn test_abandoned_closed_call_is_neutral() {
        let mut breaker = CircuitBreaker::new(&config(1, 0));
        assert!(breaker.allow());
        breaker.on_abandoned();
        assert_eq!(breaker.state_value(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_half_open_trial_recovers() {
        let source = Arc::new(
            StaticSource::new("flaky")
                .with_behavior(StaticBehavior::FailFirst(1))
                .with_latency(Duration::from_millis(50)),
        );
        let provider = ResilientProvider::new("flaky", Arc::clone(&source), &config(1, 20));
        let request = ProviderRequest::new("t");

        assert!(provider.invoke(&request, deadline()).await.is_err());
        assert_eq!(provider.breaker_state(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let trial = tokio::time::timeout(
            Duration::from_millis(10),
            provider.invoke(&request, deadline()),
        )
        .await;
        assert!(trial.is_err(), "trial should be cut off by the caller");
        assert_eq!(provider.breaker_state(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(provider.is_available());
        assert!(provider.invoke(&request, deadline()).await.is_ok());
        assert_eq!(provider.breaker_state(), 0);
        assert_eq!(source.call_count(), 3);
    }

    #[test]
    fn test_half_open_limits_trial_calls() {
        let mut breaker = CircuitBreaker::new(&config(1, 0));
        assert!(breaker.on_failure());
        assert!(breaker.allow());
        assert_eq!(breaker.state_value(), 2);
        assert!(!breaker.allow());
        assert!(breaker.on_failure());
        assert_eq!(breaker.state_value(), 1);
    }
}
