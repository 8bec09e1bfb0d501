//! Per-alias circuit breaker.
//!
//! Pure failure accounting, no I/O. The breaker sheds load from a tool
//! that keeps failing: after `failure_threshold` consecutive classified
//! failures the circuit opens for `cooldown`, and calls are rejected
//! without touching the runner. There is no separate half-open state;
//! once the cooldown elapses the next permitted call is the probe and
//! its outcome decides what happens next.

use crate::types::BreakerConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Failure accounting for one tool alias.
#[derive(Debug, Clone)]
pub struct CircuitState {
    failures: u32,
    threshold: u32,
    cooldown: Duration,
    open_until: Option<Instant>,
}

impl CircuitState {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: 0,
            threshold,
            cooldown,
            open_until: None,
        }
    }

    /// False iff the circuit is open right now. Once the cooldown has
    /// elapsed this returns true again without clearing the failure
    /// count, so a failed probe re-opens immediately.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// A success closes the circuit and forgets all failures.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.open_until = None;
    }

    /// Count one classified failure; at the threshold, open for a full
    /// cooldown from now.
    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn allow_at(&self, now: Instant) -> bool {
        match self.open_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    fn record_failure_at(&mut self, now: Instant) {
        self.failures += 1;
        if self.failures >= self.threshold {
            self.open_until = Some(now + self.cooldown);
        }
    }
}

/// Breaker table keyed by alias.
///
/// Owned by the lifecycle manager and shared behind `&self`; entries are
/// created lazily with the configured defaults on first reference and
/// live for the life of the manager.
#[derive(Debug)]
pub struct CircuitBreaker {
    defaults: BreakerConfig,
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, alias: &str) -> bool {
        self.with_state(alias, |state| state.allow())
    }

    pub fn record_success(&self, alias: &str) {
        self.with_state(alias, |state| state.record_success());
    }

    pub fn record_failure(&self, alias: &str) {
        self.with_state(alias, |state| state.record_failure());
    }

    /// Copy of the current state for an alias, if one exists yet.
    pub fn state(&self, alias: &str) -> Option<CircuitState> {
        let circuits = self
            .circuits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        circuits.get(alias).cloned()
    }

    fn with_state<T>(&self, alias: &str, f: impl FnOnce(&mut CircuitState) -> T) -> T {
        let mut circuits = self
            .circuits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = circuits.entry(alias.to_string()).or_insert_with(|| {
            CircuitState::new(self.defaults.failure_threshold, self.defaults.cooldown)
        });
        f(state)
    }
}
