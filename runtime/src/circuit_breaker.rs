//! Circuit breaker guarding calls to an external dependency.
//!
//! The ingress gateway wraps every stream log append in a breaker so that an
//! unreachable broker fails requests immediately instead of holding each one
//! for the full append timeout.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted
//! - **Open**: calls are rejected until the cool-down elapses
//! - **HalfOpen**: calls pass through as trial calls; enough successes close the
//!   circuit, one failure reopens it
//!
//! # Example
//!
//! ```rust
//! use actionstream_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     "stream_log",
//!     CircuitBreakerConfig::builder()
//!         .failure_threshold(5)
//!         .timeout(Duration::from_secs(10))
//!         .build(),
//! );
//!
//! let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::metrics::CircuitBreakerMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: usize,
    /// Time spent Open before probing in `HalfOpen`
    pub timeout: Duration,
    /// Probe successes needed to close the circuit again
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive failures before the circuit opens.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Time spent Open before probing.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    /// Probe successes needed to close the circuit.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Requests pass through normally
    Closed,
    /// Requests fail immediately
    Open,
    /// Requests pass through as recovery trials
    HalfOpen,
}

impl State {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }
}

/// Errors from circuit breaker calls.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the operation was not attempted
    #[error("circuit breaker '{0}' is open")]
    Open(&'static str),
    /// The operation ran and failed
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: usize,
    successes: usize,
    opened_at: Option<Instant>,
}

/// Named circuit breaker. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Create a closed breaker. `name` labels its logs and metrics.
    #[must_use]
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        CircuitBreakerMetrics::record_state(name, State::Closed.gauge_value());
        Self {
            name,
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
        }
    }

    /// Current state.
    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] without running the operation if
    /// the circuit is open, or [`CircuitBreakerError::Inner`] if it ran and failed.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.try_acquire().await {
            CircuitBreakerMetrics::record_rejection(self.name);
            tracing::debug!(breaker = self.name, "Circuit open, rejecting call");
            return Err(CircuitBreakerError::Open(self.name));
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.config.timeout);
                if cooled {
                    inner.successes = 0;
                    self.transition(&mut inner, State::HalfOpen);
                }
                cooled
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, State::Closed);
                }
            }
            State::Closed | State::Open => inner.failures = 0,
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures += 1;
        let should_open = match inner.state {
            State::Closed => inner.failures >= self.config.failure_threshold,
            State::HalfOpen => true,
            State::Open => false,
        };
        if should_open {
            inner.opened_at = Some(Instant::now());
            inner.successes = 0;
            self.transition(&mut inner, State::Open);
        }
    }

    fn transition(&self, inner: &mut Inner, to: State) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        CircuitBreakerMetrics::record_state(self.name, to.gauge_value());
        if to == State::Open {
            tracing::warn!(
                breaker = self.name,
                from = from.as_str(),
                failures = inner.failures,
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(
                breaker = self.name,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker state changed"
            );
        }
    }
}
