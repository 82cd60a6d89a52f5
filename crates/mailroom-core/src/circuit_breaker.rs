//! Circuit breaker guarding calls into the AI service
//!
//! One instance is constructed at startup and shared (`Arc<CircuitBreaker>`) by
//! every caller that talks to the AI backend. All transitions happen under a
//! single mutex.
//!
//! - **Closed**: requests allowed. Consecutive failures are counted; reaching
//!   `failure_threshold` opens the circuit.
//! - **Open**: requests denied until `timeout` has elapsed since the last failure,
//!   then the breaker moves to half-open and lets one probe through.
//! - **Half-open**: one probe at a time. `success_threshold` successes close the
//!   circuit; any failure reopens it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds and timeout
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl BreakerConfig {
    /// Read overrides from `MAILROOM_BREAKER_*`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
        };

        Self {
            failure_threshold: read("MAILROOM_BREAKER_FAILURE_THRESHOLD")
                .map(|v| v as u32)
                .unwrap_or(defaults.failure_threshold),
            success_threshold: read("MAILROOM_BREAKER_SUCCESS_THRESHOLD")
                .map(|v| v as u32)
                .unwrap_or(defaults.success_threshold),
            timeout: read("MAILROOM_BREAKER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// Point-in-time view for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: u64,
    /// Seconds until an open breaker lets a probe through
    pub retry_in_secs: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    last_error: Option<String>,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            probe_in_flight: false,
            last_error: None,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn with_params(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self::new(BreakerConfig {
            failure_threshold,
            success_threshold,
            timeout,
        })
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves counters consistent enough to keep going
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the caller may call the AI service now
    ///
    /// An open breaker whose timeout has elapsed moves to half-open and admits
    /// exactly one probe; further calls are denied until that probe's outcome
    /// is recorded.
    pub fn can_make_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if elapsed {
                    info!("AI circuit breaker half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                info!("AI circuit breaker closed after successful probes");
                *inner = Inner::closed();
            }
        }
    }

    pub fn record_failure(&self, err: &dyn std::fmt::Display) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        inner.last_error = Some(err.to_string());

        match inner.state {
            CircuitState::HalfOpen => {
                warn!(error = %err, "AI probe failed, circuit breaker reopened");
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        error = %err,
                        failures = inner.failure_count,
                        "AI circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {
                inner.failure_count += 1;
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Force the breaker closed and clear counters
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = Inner::closed();
        info!("AI circuit breaker reset");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_in_secs = match (inner.state, inner.last_failure) {
            (CircuitState::Open, Some(t)) => {
                Some(self.config.timeout.saturating_sub(t.elapsed()).as_secs())
            }
            _ => None,
        };

        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            timeout_secs: self.config.timeout.as_secs(),
            retry_in_secs,
            last_error: inner.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::with_params(3, 2, Duration::from_millis(40))
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..3 {
            cb.record_failure(&"timeout");
        }
    }

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_make_request());
        assert_eq!(cb.config().failure_threshold, 3);
        assert_eq!(cb.config().timeout, Duration::from_secs(900));
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = fast_breaker();
        cb.record_failure(&"e1");
        cb.record_failure(&"e2");
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(&"e3");
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_make_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = fast_breaker();
        cb.record_failure(&"e1");
        cb.record_failure(&"e2");
        cb.record_success();
        cb.record_failure(&"e3");
        cb.record_failure(&"e4");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 2);
    }

    #[test]
    fn test_half_open_admits_one_probe() {
        let cb = fast_breaker();
        trip(&cb);
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.can_make_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.can_make_request());
    }

    #[test]
    fn test_two_successes_close() {
        let cb = fast_breaker();
        trip(&cb);
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.can_make_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_make_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().success_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = fast_breaker();
        trip(&cb);
        std::thread::sleep(Duration::from_millis(60));

        assert!(cb.can_make_request());
        cb.record_success();
        assert!(cb.can_make_request());
        cb.record_failure(&"still down");
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().success_count, 0);
        assert!(!cb.can_make_request());
    }

    #[test]
    fn test_reset() {
        let cb = fast_breaker();
        trip(&cb);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_make_request());
        assert!(cb.snapshot().last_error.is_none());
    }

    #[test]
    fn test_snapshot_reports_retry_window() {
        let cb = CircuitBreaker::with_params(1, 1, Duration::from_secs(60));
        cb.record_failure(&"boom");
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert!(snap.retry_in_secs.unwrap() <= 60);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_concurrent_failures_open_once() {
        let cb = Arc::new(CircuitBreaker::with_params(3, 2, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || cb.record_failure(&"down"))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
