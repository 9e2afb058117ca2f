//! A resilience4j-style circuit breaker: closed -> open -> half-open -> closed.
//!
//! Grounded on the retry/backoff shape in `hook-common::retry::RetryPolicy`
//! (explicit, data-only policy struct rather than an annotation/aspect), but
//! the state machine itself is this crate's own: the corpus has no circuit
//! breaker crate to imitate, so this follows spec.md section 4.2/8 directly
//! (failure-rate threshold over a sliding window of calls, an open window,
//! and a bounded number of half-open probes).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::SlidingCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of calls in the sliding window before a failure rate is computed.
    pub minimum_number_of_calls: usize,
    /// Failure rate (0.0-1.0) above which the breaker opens.
    pub failure_rate_threshold: f64,
    /// How long the breaker stays open before allowing half-open probes.
    pub wait_duration_in_open_state: Duration,
    /// Number of probe calls allowed through while half-open.
    pub permitted_number_of_calls_in_half_open_state: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            minimum_number_of_calls: 10,
            failure_rate_threshold: 0.5,
            wait_duration_in_open_state: Duration::from_secs(30),
            permitted_number_of_calls_in_half_open_state: 3,
        }
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Thread-safe circuit breaker. One instance guards one logical endpoint
/// (e.g. the IDP token endpoint, or a single (server, topic) RPC stream).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    opened_at_ms: AtomicU64,
    epoch: Instant,
    counter: SlidingCounter,
    half_open_permits: Mutex<usize>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            counter: SlidingCounter::new(config.minimum_number_of_calls),
            half_open_permits: Mutex::new(config.permitted_number_of_calls_in_half_open_state),
            config,
            state: AtomicU8::new(STATE_CLOSED),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Must be called before each attempt. Returns `false` when the breaker
    /// is open and the call must fail fast without invoking the operation.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let mut permits = self.half_open_permits.lock().unwrap();
                if *permits > 0 {
                    *permits -= 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => {
                let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
                if self.now_ms().saturating_sub(opened_at)
                    >= self.config.wait_duration_in_open_state.as_millis() as u64
                {
                    self.transition_to_half_open();
                    self.allow_request()
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.counter.record(true);
        if self.state() == CircuitState::HalfOpen {
            self.transition_to_closed();
        }
        self.maybe_trip();
    }

    pub fn record_failure(&self) {
        self.counter.record(false);
        if self.state() == CircuitState::HalfOpen {
            self.transition_to_open();
            return;
        }
        self.maybe_trip();
    }

    fn maybe_trip(&self) {
        if self.state() != CircuitState::Closed {
            return;
        }
        if let Some(rate) = self.counter.failure_rate() {
            if rate >= self.config.failure_rate_threshold {
                self.transition_to_open();
            }
        }
    }

    fn transition_to_open(&self) {
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        self.opened_at_ms.store(self.now_ms(), Ordering::SeqCst);
        self.counter.clear();
    }

    fn transition_to_half_open(&self) {
        let prev = self.state.swap(STATE_HALF_OPEN, Ordering::SeqCst);
        if prev != STATE_HALF_OPEN {
            *self.half_open_permits.lock().unwrap() =
                self.config.permitted_number_of_calls_in_half_open_state;
        }
    }

    fn transition_to_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.counter.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            minimum_number_of_calls: 4,
            failure_rate_threshold: 0.5,
            wait_duration_in_open_state: Duration::from_millis(50),
            permitted_number_of_calls_in_half_open_state: 2,
        })
    }

    #[test]
    fn opens_above_failure_rate_threshold() {
        let b = breaker();
        assert_eq!(b.state(), CircuitState::Closed);
        b.record_success();
        b.record_failure();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.allow_request());
    }

    #[test]
    fn stays_closed_below_threshold() {
        let b = breaker();
        b.record_success();
        b.record_success();
        b.record_success();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.allow_request());
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_wait_and_permits_probes() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.allow_request());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.allow_request());
        assert!(!b.allow_request());
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.allow_request());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_success_closes_breaker() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.allow_request());
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
