//! Per-dependency circuit breaker.
//!
//! Closed counts consecutive failures; at the threshold the circuit opens and
//! rejects every call. Once the recovery timeout has elapsed since the last
//! failure, the next caller becomes the single half-open probe: its success
//! closes the circuit, its failure reopens it.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward threshold.
    Closed { consecutive_failures: u32 },
    /// Rejecting calls until `opened_at + wait_duration`.
    Open {
        opened_at: Instant,
        wait_duration: Duration,
    },
    /// One probe call allowed to test whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    probe_in_flight: bool,
    failure_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed {
                    consecutive_failures: 0,
                },
                probe_in_flight: false,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock still holds consistent state: every write is a
        // single assignment.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Ask to place a call, returning a permit that records its outcome.
    ///
    /// A permit dropped without an outcome (the caller's future was
    /// cancelled) releases a held probe as if the failure were ignored.
    pub fn acquire(&self) -> Option<CallPermit<'_>> {
        let probe = {
            let mut inner = self.lock();
            if !self.admit(&mut inner) {
                return None;
            }
            inner.probe_in_flight
        };
        Some(CallPermit {
            breaker: self,
            probe,
            resolved: false,
        })
    }

    /// Ask to place a call. Returns `false` when the call must be rejected.
    ///
    /// Transitions Open -> HalfOpen when the recovery timeout has elapsed;
    /// the caller that triggers it holds the probe and must record an
    /// outcome. Prefer [`CircuitBreaker::acquire`].
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.admit(&mut inner)
    }

    fn admit(&self, inner: &mut Inner) -> bool {
        match inner.state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open {
                opened_at,
                wait_duration,
            } => {
                if opened_at.elapsed() >= wait_duration {
                    tracing::info!(dependency = %self.name, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
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
        if !matches!(inner.state, CircuitState::Closed { .. }) {
            tracing::info!(dependency = %self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
        inner.probe_in_flight = false;
        inner.failure_count = 0;
    }

    /// Record a failure that counts toward opening the circuit.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.failure_count += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let count = consecutive_failures + 1;
                if count >= self.failure_threshold {
                    tracing::warn!(dependency = %self.name, failures = count, "circuit opened");
                    inner.state = CircuitState::Open {
                        opened_at: now,
                        wait_duration: self.recovery_timeout,
                    };
                } else {
                    inner.state = CircuitState::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(dependency = %self.name, "probe failed, circuit reopened");
                inner.state = CircuitState::Open {
                    opened_at: now,
                    wait_duration: self.recovery_timeout,
                };
                inner.probe_in_flight = false;
            }
            CircuitState::Open { .. } => {
                inner.state = CircuitState::Open {
                    opened_at: now,
                    wait_duration: self.recovery_timeout,
                };
            }
        }
    }

    /// A failure that says nothing about the dependency's health (bad
    /// credentials, invalid request). Releases a held probe without
    /// changing state.
    pub fn record_ignored(&self) {
        self.lock().probe_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.lock().last_failure
    }
}

/// An admitted call. Resolve it with `success`, `failure` or `ignored`.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }

    pub fn ignored(mut self) {
        self.resolved = true;
        self.breaker.record_ignored();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            tracing::debug!(dependency = %self.breaker.name, "probe abandoned, releasing it");
            self.breaker.record_ignored();
        }
    }
}
