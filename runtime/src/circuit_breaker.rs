//! Circuit breaker isolating the system from a failing downstream dependency.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls are rejected without invoking the operation until
//!   `open_duration` has elapsed since the breaker opened.
//! - **HalfOpen**: the first call after `open_duration` is a trial. Success
//!   closes the breaker, failure re-opens it and restarts the window.
//!
//! The Open → `HalfOpen` transition is evaluated lazily on the next call; no
//! timer runs in the background. Time is read from [`tokio::time::Instant`].
//!
//! One breaker is built per downstream integration and injected where it is
//! used.
//!
//! # Example
//!
//! ```rust
//! use holdfast_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(3)
//!     .open_duration(Duration::from_secs(30))
//!     .build();
//!
//! let breaker = CircuitBreaker::new("fulfillment", config);
//!
//! let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::metrics::CircuitBreakerMetrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: None,
            open_duration: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    open_duration: Option<Duration>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold. Values below 1 are treated as 1.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set how long the circuit stays open.
    #[must_use]
    pub const fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = Some(duration);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            failure_threshold: self
                .failure_threshold
                .unwrap_or(defaults.failure_threshold)
                .max(1),
            open_duration: self.open_duration.unwrap_or(defaults.open_duration),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Requests pass through normally
    Closed,
    /// Requests fail immediately
    Open,
    /// Testing whether the dependency recovered
    HalfOpen,
}

impl State {
    /// Gauge value exported to Prometheus (0=closed, 1=half-open, 2=open).
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not invoked.
    #[error("circuit breaker '{name}' is open after {failures} consecutive failures")]
    Open {
        /// Breaker name
        name: String,
        /// Consecutive failures when the call was rejected
        failures: u32,
    },
    /// The operation ran and failed.
    #[error("operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for one downstream dependency.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<BreakerState>>,
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

enum Admission {
    Allowed,
    Rejected { failures: u32 },
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        CircuitBreakerMetrics::record_state(&name, State::Closed.as_gauge());
        Self {
            name,
            config: Arc::new(config),
            state: Arc::new(RwLock::new(BreakerState {
                state: State::Closed,
                failure_count: 0,
                opened_at: None,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Breaker name, used in logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Does not evaluate the Open → `HalfOpen` transition.
    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Current consecutive failure count.
    pub async fn failure_count(&self) -> u32 {
        self.state.read().await.failure_count
    }

    /// Call an operation through the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` without invoking `operation` while
    /// the circuit is open, and `CircuitBreakerError::Inner` when the
    /// operation fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        CircuitBreakerMetrics::record_call(&self.name);

        if let Admission::Rejected { failures } = self.admit().await {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            CircuitBreakerMetrics::record_rejection(&self.name);
            tracing::warn!(
                breaker = %self.name,
                failures,
                "Circuit breaker is OPEN, rejecting call"
            );
            return Err(CircuitBreakerError::Open {
                name: self.name.to_string(),
                failures,
            });
        }

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                CircuitBreakerMetrics::record_success(&self.name);
                Ok(result)
            }
            Err(err) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                CircuitBreakerMetrics::record_failure(&self.name);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn admit(&self) -> Admission {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed | State::HalfOpen => Admission::Allowed,
            State::Open => {
                let elapsed = state
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.open_duration);
                if elapsed {
                    tracing::info!(breaker = %self.name, "Circuit breaker transitioning OPEN -> HALF_OPEN");
                    state.state = State::HalfOpen;
                    CircuitBreakerMetrics::record_state(&self.name, State::HalfOpen.as_gauge());
                    Admission::Allowed
                } else {
                    Admission::Rejected {
                        failures: state.failure_count,
                    }
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                state.failure_count = 0;
            }
            State::HalfOpen | State::Open => {
                tracing::info!(breaker = %self.name, "Circuit breaker transitioning HALF_OPEN -> CLOSED");
                state.state = State::Closed;
                state.failure_count = 0;
                state.opened_at = None;
                CircuitBreakerMetrics::record_state(&self.name, State::Closed.as_gauge());
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.failure_count = state.failure_count.saturating_add(1);

        match state.state {
            State::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    state.state = State::Open;
                    state.opened_at = Some(Instant::now());
                    CircuitBreakerMetrics::record_state(&self.name, State::Open.as_gauge());
                }
            }
            State::HalfOpen => {
                tracing::warn!(
                    breaker = %self.name,
                    failures = state.failure_count,
                    "Circuit breaker transitioning HALF_OPEN -> OPEN (trial failed)"
                );
                state.state = State::Open;
                state.opened_at = Some(Instant::now());
                CircuitBreakerMetrics::record_state(&self.name, State::Open.as_gauge());
            }
            // A call admitted before another caller opened the circuit.
            State::Open => {}
        }
    }

    /// Snapshot of call counters.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker closed. For manual intervention.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset to CLOSED");
        state.state = State::Closed;
        state.failure_count = 0;
        state.opened_at = None;
        CircuitBreakerMetrics::record_state(&self.name, State::Closed.as_gauge());
    }
}

/// Call counters of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Calls attempted, including rejected ones
    pub total_calls: u64,
    /// Calls whose operation succeeded
    pub total_successes: u64,
    /// Calls whose operation failed
    pub total_failures: u64,
    /// Calls rejected while open
    pub total_rejections: u64,
}

impl CircuitBreakerStats {
    /// Fraction of calls rejected (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_rejections as f64 / self.total_calls as f64
    }
}
