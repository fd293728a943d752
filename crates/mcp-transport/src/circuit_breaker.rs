//! Three-state circuit breaker guarding outbound requests against a failing peer.
//!
//! Unlike a rolling-window breaker, this one trips on *consecutive* failures/successes —
//! simpler to reason about and cheap to keep consistent under concurrent access, at the cost
//! of being more sensitive to single flaky requests than a windowed rate would be.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mcp_protocol::{Error, Result};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

/// The breaker's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through normally.
    Closed,
    /// Requests are rejected instantly without being attempted.
    Open,
    /// Exactly one probe request is allowed through to test recovery.
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}

/// Thresholds governing state transitions.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before tripping to `Open`.
    pub failure_threshold: u32,
    /// Consecutive successes in `HalfOpen` before closing.
    pub success_threshold: u32,
    /// How long `Open` must elapse since the last failure before allowing a probe.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// A point-in-time snapshot of cumulative counters and the current state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakerStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub state_transitions: u64,
    pub current_state: CircuitState,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<Instant>,
    probe_in_flight: bool,
}

type TransitionCallback = dyn Fn(CircuitState, CircuitState) + Send + Sync;

/// Guards an outbound operation stream with consecutive-failure tripping.
///
/// All state transitions are serialized under an internal mutex; registered transition
/// callbacks are invoked after the mutex is released, so a callback may safely call back
/// into the breaker (e.g. to read `stats()`) without deadlocking.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    callbacks: Mutex<Vec<Box<TransitionCallback>>>,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rejected_requests: AtomicU64,
    state_transitions: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_time: None,
                probe_in_flight: false,
            }),
            callbacks: Mutex::new(Vec::new()),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Register a callback invoked on every committed state transition, `(old, new)`.
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Box::new(callback));
    }

    fn fire(&self, old: CircuitState, new: CircuitState) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        debug!(?old, ?new, "circuit breaker transition");
        for cb in self.callbacks.lock().iter() {
            cb(old, new);
        }
    }

    /// Ask whether a request may proceed; counts one `total_requests` regardless of the
    /// answer, and may itself drive an `Open -> HalfOpen` transition.
    #[must_use]
    pub fn allow_request(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = inner
                    .last_failure_time
                    .is_some_and(|t| t.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.consecutive_successes = 0;
                    drop(inner);
                    self.fire(CircuitState::Open, CircuitState::HalfOpen);
                    true
                } else {
                    self.rejected_requests.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    self.rejected_requests.fetch_add(1, Ordering::Relaxed);
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    drop(inner);
                    self.fire(CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                trace!("late success recorded against an already-open breaker");
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure_time = Some(Instant::now());
                    drop(inner);
                    self.fire(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                inner.consecutive_successes = 0;
                inner.consecutive_failures = 0;
                inner.last_failure_time = Some(Instant::now());
                drop(inner);
                self.fire(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Open => {
                inner.last_failure_time = Some(Instant::now());
            }
        }
    }

    /// Force the breaker open. A no-op, without callback emission, if already `Open`.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            return;
        }
        let old = inner.state;
        inner.state = CircuitState::Open;
        inner.last_failure_time = Some(Instant::now());
        inner.probe_in_flight = false;
        drop(inner);
        self.fire(old, CircuitState::Open);
        warn!("circuit breaker forced open");
    }

    /// Force the breaker closed. A no-op, without callback emission, if already `Closed`.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Closed {
            return;
        }
        let old = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.probe_in_flight = false;
        drop(inner);
        self.fire(old, CircuitState::Closed);
    }

    /// Reset to `Closed` with all consecutive counters cleared. Idempotent like
    /// `force_close`; cumulative statistics are left untouched.
    pub fn reset(&self) {
        self.force_close();
    }

    /// A consistent snapshot of cumulative counters and the current state.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            current_state: self.inner.lock().state,
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `f`, recording exactly one success or failure against the breaker, unless the
    /// breaker rejects the call outright (in which case neither counter is touched beyond
    /// `allow_request`'s own `total_requests`/`rejected_requests` bookkeeping).
    ///
    /// # Errors
    /// Returns [`Error::CircuitOpen`] without calling `f` if the breaker rejects the call;
    /// otherwise propagates whatever error `f` returns.
    pub async fn guard<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.allow_request() {
            return Err(Error::CircuitOpen);
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.trips_circuit_breaker() {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread::sleep;

    #[test]
    fn closed_trips_to_open_at_failure_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn full_recovery_cycle() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 3,
            recovery_timeout: Duration::from_millis(20),
        });

        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request(), "still within recovery_timeout");

        sleep(Duration::from_millis(30));

        assert!(breaker.allow_request(), "probe should be allowed");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(
            !breaker.allow_request(),
            "concurrent request during the probe must be rejected"
        );

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let stats = breaker.stats();
        assert_eq!(stats.rejected_requests, 2);
    }

    #[test]
    fn half_open_failure_returns_to_open() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(1),
        });
        breaker.allow_request();
        breaker.record_failure();
        sleep(Duration::from_millis(5));
        breaker.allow_request();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn force_open_and_close_are_idempotent() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let transitions = Arc::new(AtomicU64::new(0));
        let counter = transitions.clone();
        breaker.on_transition(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        breaker.force_close();
        assert_eq!(transitions.load(Ordering::SeqCst), 0, "already closed");

        breaker.force_open();
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
        breaker.force_open();
        assert_eq!(transitions.load(Ordering::SeqCst), 1, "already open");

        breaker.force_close();
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn guard_records_rpc_errors_as_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let result: Result<()> = breaker
            .guard(|| async { Err(Error::rpc(-32000, "application error")) })
            .await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failed_requests, 0);
    }

    #[tokio::test]
    async fn guard_trips_on_transport_errors() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let result: Result<()> = breaker.guard(|| async { Err(Error::network("down")) }).await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn guard_rejects_without_calling_closure_when_open() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(3600),
            ..Default::default()
        });
        breaker.force_open();
        let called = Arc::new(AtomicU64::new(0));
        let flag = called.clone();
        let result: Result<()> = breaker
            .guard(|| async move {
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::CircuitOpen)));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
