use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::{Decision, Severity};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are blocked
    Open,
    /// Circuit is half-open, testing if the backend has recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "CLOSED"),
            CircuitBreakerState::Open => write!(f, "OPEN"),
            CircuitBreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breakers, shared by the whole fleet
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u64,
    /// Failure ratio that opens the circuit once enough calls were seen (0-1)
    pub error_rate_threshold: f64,
    /// Seconds to wait before probing a tripped backend again
    pub open_timeout_s: u64,
    /// Consecutive successes required to close from half-open
    pub half_open_max_calls: u64,
    /// Minimum calls before the error-rate rule applies
    pub min_request_count: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            error_rate_threshold: 0.5,
            open_timeout_s: 30,
            half_open_max_calls: 3,
            min_request_count: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_s)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    consecutive_failures: u64,
    failure_count: u64,
    success_count: u64,
    total_calls: u64,
    half_open_calls: u64,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn fresh() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            half_open_calls: 0,
            next_attempt: None,
            next_attempt_at: None,
            last_failure_at: None,
        }
    }

    fn error_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_calls as f64
        }
    }
}

/// Three-state circuit breaker for a single backend.
///
/// Transitions are linearised by one lock over the whole record; the critical
/// sections are pure in-memory updates.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: RwLock::new(BreakerInner::fresh()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether the breaker admits a call right now.
    ///
    /// In OPEN this reports true once the open timeout elapsed; the caller is
    /// expected to drive [`CircuitBreaker::try_half_open`] before proceeding.
    pub async fn can_execute(&self) -> bool {
        let inner = self.inner.read().await;
        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => inner
                .next_attempt
                .map(|at| Instant::now() >= at)
                .unwrap_or(true),
            CircuitBreakerState::HalfOpen => inner.half_open_calls < self.config.half_open_max_calls,
        }
    }

    /// Move OPEN → HALF_OPEN when the open timeout has elapsed.
    pub async fn try_half_open(&self) -> Option<Decision> {
        let mut inner = self.inner.write().await;
        if inner.state == CircuitBreakerState::Open
            && inner
                .next_attempt
                .map(|at| Instant::now() >= at)
                .unwrap_or(true)
        {
            inner.state = CircuitBreakerState::HalfOpen;
            inner.half_open_calls = 0;

            info!(
                circuit_breaker = %self.name,
                "Circuit breaker transitioned to HALF_OPEN, testing backend"
            );

            return Some(
                Decision::new(Severity::Info, "Circuit breaker half-open, testing backend")
                    .for_url(&self.name),
            );
        }
        None
    }

    /// Record a successful execution
    pub async fn on_success(&self) -> Option<Decision> {
        let mut inner = self.inner.write().await;
        inner.total_calls += 1;
        inner.success_count += 1;

        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.half_open_calls += 1;
                debug!(
                    circuit_breaker = %self.name,
                    half_open_calls = inner.half_open_calls,
                    threshold = self.config.half_open_max_calls,
                    "Circuit breaker recorded half-open success"
                );

                if inner.half_open_calls >= self.config.half_open_max_calls {
                    return Some(self.close_circuit(&mut inner));
                }
                Some(
                    Decision::new(Severity::Info, "Circuit breaker half-open: success recorded")
                        .for_url(&self.name),
                )
            }
            CircuitBreakerState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            CircuitBreakerState::Open => None,
        }
    }

    /// Record a failed execution
    pub async fn on_failure(&self) -> Option<Decision> {
        let mut inner = self.inner.write().await;
        inner.total_calls += 1;
        inner.failure_count += 1;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitBreakerState::Closed => {
                if self.should_open(&inner) {
                    return Some(self.open_circuit(&mut inner));
                }
                debug!(
                    circuit_breaker = %self.name,
                    consecutive_failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );
                Some(
                    Decision::new(
                        Severity::Warning,
                        format!(
                            "Circuit breaker failure count: {}/{}",
                            inner.consecutive_failures, self.config.failure_threshold
                        ),
                    )
                    .for_url(&self.name),
                )
            }
            // Any failure while probing sends the circuit straight back open
            CircuitBreakerState::HalfOpen => Some(self.open_circuit(&mut inner)),
            CircuitBreakerState::Open => None,
        }
    }

    /// Timeouts count as failures
    pub async fn on_timeout(&self) -> Option<Decision> {
        self.on_failure().await
    }

    /// Reset to the initial state, zeroing all counters. Used by the admin
    /// surface; the call is audit-logged.
    pub async fn reset(&self) -> Decision {
        let mut inner = self.inner.write().await;
        let old_state = inner.state;
        *inner = BreakerInner::fresh();

        info!(
            circuit_breaker = %self.name,
            from = %old_state,
            "Circuit breaker manually reset to CLOSED"
        );

        Decision::new(
            Severity::Info,
            format!("Circuit breaker manually reset from {}", old_state),
        )
        .for_url(&self.name)
    }

    pub async fn state(&self) -> CircuitBreakerState {
        self.inner.read().await.state
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read().await;
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            consecutive_failures: inner.consecutive_failures,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            half_open_calls: inner.half_open_calls,
            error_rate: inner.error_rate(),
            next_attempt: inner.next_attempt_at.map(|t| t.to_rfc3339()),
            last_failure: inner.last_failure_at.map(|t| t.to_rfc3339()),
        }
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        if inner.consecutive_failures >= self.config.failure_threshold {
            return true;
        }

        inner.total_calls >= self.config.min_request_count
            && inner.error_rate() >= self.config.error_rate_threshold
    }

    fn open_circuit(&self, inner: &mut BreakerInner) -> Decision {
        inner.state = CircuitBreakerState::Open;
        inner.next_attempt = Some(Instant::now() + self.config.open_timeout());
        inner.next_attempt_at = Utc::now().checked_add_signed(
            chrono::Duration::from_std(self.config.open_timeout())
                .unwrap_or_else(|_| chrono::Duration::zero()),
        );
        inner.half_open_calls = 0;

        warn!(
            circuit_breaker = %self.name,
            failures = inner.failure_count,
            error_rate = inner.error_rate(),
            "Circuit breaker OPENED"
        );

        Decision::new(
            Severity::Critical,
            format!(
                "Circuit breaker opened - {} failures, error rate: {:.2}",
                inner.failure_count,
                inner.error_rate()
            ),
        )
        .for_url(&self.name)
    }

    fn close_circuit(&self, inner: &mut BreakerInner) -> Decision {
        *inner = BreakerInner::fresh();

        info!(
            circuit_breaker = %self.name,
            "Circuit breaker CLOSED after successful recovery"
        );

        Decision::new(Severity::Info, "Circuit breaker closed - backend recovered")
            .for_url(&self.name)
    }
}

/// Point-in-time view of one breaker, surfaced by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitBreakerState,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub success_count: u64,
    pub total_calls: u64,
    pub half_open_calls: u64,
    pub error_rate: f64,
    pub next_attempt: Option<String>,
    pub last_failure: Option<String>,
}
