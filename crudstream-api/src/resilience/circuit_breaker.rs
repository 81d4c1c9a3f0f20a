//! Circuit breaker guarding one remote dependency.
//!
//! ```text
//!   Closed --(failure_threshold consecutive failures)--> Open
//!   Open   --(cool_down elapsed)-----------------------> HalfOpen
//!   HalfOpen --(any failure)---------------------------> Open
//!   HalfOpen --(success_threshold consecutive successes)-> Closed
//! ```
//!
//! Every transition starts a new generation and clears the counts. A call
//! records its outcome only if the breaker is still in the generation the
//! call started in, so a slow call that straddles a transition cannot skew
//! the new state's counts.
//!
//! While closed, counts are also cleared every `interval` when one is set.
//!
//! Only errors for which [`CrudError::is_dependency_failure`] is true count
//! as failures. A missing row or a validation error is a healthy answer.

use super::notifier::{AlertSender, StateChange};
use crate::config::CircuitBreakerConfig;
use crudstream_core::{CircuitState, CrudResult, DependencyError};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// Request and outcome counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitCounts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl CircuitCounts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: CircuitCounts,
    /// Closed: end of the counting window. Open: end of the cool-down.
    expiry: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    alerts: Option<AlertSender>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let expiry = config.interval.map(|interval| Instant::now() + interval);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: CircuitCounts::default(),
                expiry,
            }),
            alerts: None,
        }
    }

    /// Send every state change to `alerts`.
    pub fn with_alerts(mut self, alerts: AlertSender) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Moves an open breaker whose cool-down has elapsed to
    /// half-open.
    pub fn state(&self) -> CircuitState {
        let mut changes = Vec::new();
        let state = {
            let mut inner = self.lock();
            self.refresh(&mut inner, Instant::now(), &mut changes);
            inner.state
        };
        self.emit(changes);
        state
    }

    pub fn counts(&self) -> CircuitCounts {
        let mut changes = Vec::new();
        let counts = {
            let mut inner = self.lock();
            self.refresh(&mut inner, Instant::now(), &mut changes);
            inner.counts
        };
        self.emit(changes);
        counts
    }

    /// Force the breaker closed with fresh counts.
    pub fn reset(&self) {
        let mut changes = Vec::new();
        {
            let mut inner = self.lock();
            self.transition(&mut inner, CircuitState::Closed, Instant::now(), &mut changes);
            self.new_generation(&mut inner, Instant::now());
        }
        self.emit(changes);
    }

    /// Run `operation` if the circuit admits it.
    ///
    /// Fails fast with [`DependencyError::CircuitOpen`] while open, and with
    /// [`DependencyError::ProbeLimitReached`] once a half-open breaker has
    /// admitted its probe budget. Otherwise the operation's own result is
    /// returned unchanged. If the returned future is dropped before the
    /// operation finishes, the call counts as a failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> CrudResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CrudResult<T>>,
    {
        let generation = self.before_call()?;
        let call = PendingCall {
            breaker: self,
            generation,
            settled: false,
        };

        let result = operation().await;
        let success = match &result {
            Ok(_) => true,
            Err(e) => !e.is_dependency_failure(),
        };
        call.settle(success);
        result
    }

    fn before_call(&self) -> CrudResult<u64> {
        let mut changes = Vec::new();
        let admitted = {
            let mut inner = self.lock();
            self.refresh(&mut inner, Instant::now(), &mut changes);

            match inner.state {
                CircuitState::Open => Err(DependencyError::CircuitOpen {
                    name: self.name.clone(),
                }),
                CircuitState::HalfOpen
                    if inner.counts.requests >= self.config.half_open_max_requests =>
                {
                    Err(DependencyError::ProbeLimitReached {
                        name: self.name.clone(),
                    })
                }
                _ => {
                    inner.counts.on_request();
                    Ok(inner.generation)
                }
            }
        };
        self.emit(changes);

        match admitted {
            Ok(generation) => Ok(generation),
            Err(e) => {
                tracing::debug!(circuit = %self.name, error = %e, "Call rejected");
                Err(e.into())
            }
        }
    }

    fn after_call(&self, generation: u64, success: bool) {
        let mut changes = Vec::new();
        {
            let mut inner = self.lock();
            let now = Instant::now();
            self.refresh(&mut inner, now, &mut changes);

            if inner.generation != generation {
                // Outcome belongs to an earlier generation.
            } else if success {
                inner.counts.on_success();
                if inner.state == CircuitState::HalfOpen
                    && inner.counts.consecutive_successes >= self.config.success_threshold
                {
                    self.transition(&mut inner, CircuitState::Closed, now, &mut changes);
                }
            } else {
                inner.counts.on_failure();
                match inner.state {
                    CircuitState::Closed
                        if inner.counts.consecutive_failures >= self.config.failure_threshold =>
                    {
                        self.transition(&mut inner, CircuitState::Open, now, &mut changes);
                    }
                    CircuitState::HalfOpen => {
                        self.transition(&mut inner, CircuitState::Open, now, &mut changes);
                    }
                    _ => {}
                }
            }
        }
        self.emit(changes);
    }

    /// Apply time-driven changes: close the counting window, end the cool-down.
    fn refresh(&self, inner: &mut BreakerState, now: Instant, changes: &mut Vec<StateChange>) {
        match (inner.state, inner.expiry) {
            (CircuitState::Closed, Some(expiry)) if expiry <= now => {
                self.new_generation(inner, now);
            }
            (CircuitState::Open, Some(expiry)) if expiry <= now => {
                self.transition(inner, CircuitState::HalfOpen, now, changes);
            }
            _ => {}
        }
    }

    fn transition(
        &self,
        inner: &mut BreakerState,
        to: CircuitState,
        now: Instant,
        changes: &mut Vec<StateChange>,
    ) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        self.new_generation(inner, now);
        changes.push(StateChange::new(&self.name, from, to));
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = CircuitCounts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => self.config.interval.map(|interval| now + interval),
            CircuitState::Open => Some(now + self.config.cool_down),
            CircuitState::HalfOpen => None,
        };
    }

    /// Log and publish transitions. Called with the lock released.
    fn emit(&self, changes: Vec<StateChange>) {
        for change in changes {
            match change.to {
                CircuitState::Open => tracing::warn!(
                    circuit = %change.name,
                    from = %change.from,
                    to = %change.to,
                    "Circuit state changed"
                ),
                _ => tracing::info!(
                    circuit = %change.name,
                    from = %change.from,
                    to = %change.to,
                    "Circuit state changed"
                ),
            }
            if let Some(alerts) = &self.alerts {
                alerts.send(change);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("counts", &inner.counts)
            .finish()
    }
}

/// Records the outcome of an admitted call, or a failure if dropped first.
struct PendingCall<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl PendingCall<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_call(self.generation, false);
        }
    }
}
