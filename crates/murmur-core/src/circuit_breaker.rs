// ABOUTME: Circuit breaker that fails transport calls fast after repeated errors.
// ABOUTME: Includes GuardedTransport, which routes every Transport call through a breaker.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{BusError, Result};
use crate::transport::{DeliverySink, SubscriptionId, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Closed → Open after `threshold` failures, Open → HalfOpen after `timeout`,
/// HalfOpen → Closed on success or back to Open on failure.
///
/// Failures accumulate while closed; only the half-open reset clears them.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.threshold, config.timeout())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    /// Admit a call or reject it with `CircuitOpen`. Returns whether the
    /// admitted call holds the half-open probe slot.
    ///
    /// Once the timeout has elapsed the breaker goes half-open and admits a
    /// single probe; other callers keep failing until the probe settles.
    fn admit(&self) -> Result<bool> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.timeout);
                if cooled {
                    info!("Circuit breaker half-open, allowing probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(true)
                } else {
                    Err(BusError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BusError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker closed after successful probe");
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.opened_at = None;
            inner.probe_in_flight = false;
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed if inner.failures >= self.threshold => {
                warn!(failures = inner.failures, "Circuit breaker opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            _ => {}
        }
    }

    /// A non-transport error or a dropped probe releases the slot without a verdict.
    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Run `operation` through the breaker.
    pub async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let mut probe = ProbeSlot {
            breaker: self,
            held: self.admit()?,
        };
        let outcome = operation.await;
        probe.held = false;
        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_transport_failure() {
                    self.record_failure();
                } else {
                    self.release_probe();
                }
                Err(err)
            }
        }
    }
}

/// Frees the half-open probe slot if the call is dropped before it settles.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.breaker.release_probe();
        }
    }
}

/// A transport whose every call passes through a circuit breaker.
pub struct GuardedTransport {
    inner: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedTransport {
    pub fn new(inner: Arc<dyn Transport>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl Transport for GuardedTransport {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.breaker
            .call(self.inner.publish(channel, payload))
            .await
    }

    async fn subscribe(&self, channel: &str, sink: DeliverySink) -> Result<SubscriptionId> {
        self.breaker.call(self.inner.subscribe(channel, sink)).await
    }

    async fn psubscribe(&self, pattern: &str, sink: DeliverySink) -> Result<SubscriptionId> {
        self.breaker.call(self.inner.psubscribe(pattern, sink)).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.breaker.call(self.inner.unsubscribe(id)).await
    }

    async fn push_list(&self, key: &str, value: &[u8]) -> Result<()> {
        self.breaker.call(self.inner.push_list(key, value)).await
    }

    async fn range_list(&self, key: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        self.breaker
            .call(self.inner.range_list(key, start, end))
            .await
    }

    async fn set_expiry(&self, key: &str, seconds: u64) -> Result<()> {
        self.breaker.call(self.inner.set_expiry(key, seconds)).await
    }

    async fn ping(&self) -> Result<Duration> {
        self.breaker.call(self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn fail(calls: &AtomicU32) -> Result<()> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(BusError::Transport("down".to_string()))
    }

    async fn succeed(calls: &AtomicU32) -> Result<()> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(matches!(
                breaker.call(fail(&calls)).await,
                Err(BusError::Transport(_))
            ));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.call(succeed(&calls)).await.unwrap_err();
        assert_eq!(err, BusError::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_while_closed_does_not_reset_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        breaker.call(fail(&calls)).await.ok();
        breaker.call(fail(&calls)).await.ok();
        breaker.call(succeed(&calls)).await.unwrap();
        assert_eq!(breaker.failures(), 2);

        breaker.call(fail(&calls)).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        let calls = AtomicU32::new(0);

        breaker.call(fail(&calls)).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        breaker.call(succeed(&calls)).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        let calls = AtomicU32::new(0);

        breaker.call(fail(&calls)).await.ok();
        tokio::time::sleep(Duration::from_millis(30)).await;
        breaker.call(fail(&calls)).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            breaker.call(succeed(&calls)).await.unwrap_err(),
            BusError::CircuitOpen
        );
    }

    #[tokio::test]
    async fn test_non_transport_errors_do_not_count() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let result: Result<()> = breaker
            .call(async { Err(BusError::InvalidMessage("bad".to_string())) })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_probe_frees_the_slot() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        let calls = AtomicU32::new(0);

        breaker.call(fail(&calls)).await.ok();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stalled = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(std::future::pending::<Result<()>>()),
        )
        .await;
        assert!(stalled.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.call(succeed(&calls)).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_closed_call_leaves_probe_alone() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let stalled = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(std::future::pending::<Result<()>>()),
        )
        .await;
        assert!(stalled.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(CircuitState::Closed.to_string(), "closed");
    }
}
