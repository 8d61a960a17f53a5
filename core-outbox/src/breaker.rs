//! # Circuit Breaker
//!
//! Gate that suspends all remote dispatch after repeated failures.
//!
//! ## State Transitions
//!
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Closed: cooldown elapses (checked on the next dispatch gate)
//! ```
//!
//! There is no half-open probe: once the cooldown has elapsed the gate fully
//! reopens and the failure count resets to zero. A success while closed
//! decrements the failure count by one rather than clearing it, so recovery
//! from a streak of failures is gradual.
//!
//! Time is read through an injectable [`Clock`] so tests can fast-forward
//! deterministically instead of sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Injectable time source for the breaker
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall-clock time source used outside of tests
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct BreakerState {
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker tracking consecutive remote failures
///
/// The lock is only held for short, non-suspending sections; the queue
/// manager is the sole writer during a drain.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker reading wall-clock time
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self::with_clock(threshold, cooldown, Arc::new(SystemClock))
    }

    /// Create a breaker with a custom time source
    pub fn with_clock(threshold: u32, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold,
            cooldown,
            clock,
            state: Mutex::new(BreakerState {
                failure_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Check whether a dispatch is currently allowed
    ///
    /// Called before every single dispatch, not only at drain start, so a
    /// mid-loop trip halts the loop immediately. An elapsed cooldown closes
    /// the breaker here and resets the failure count to zero.
    pub fn can_dispatch(&self) -> bool {
        !self.poll_open()
    }

    /// Whether the breaker is currently open
    pub fn is_open(&self) -> bool {
        self.poll_open()
    }

    /// Current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock_state().failure_count
    }

    /// Record a successful dispatch
    ///
    /// Decrements the failure count by one; only cooldown expiry resets it
    /// fully.
    pub fn record_success(&self) {
        let mut state = self.lock_state();
        if state.failure_count > 0 {
            state.failure_count -= 1;
        }
    }

    /// Record a failed dispatch
    ///
    /// Returns `true` when this failure tripped the breaker from closed to
    /// open, so the caller can count the trip.
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock_state();
        if state.opened_at.is_some() {
            return false;
        }
        state.failure_count += 1;
        if state.failure_count >= self.threshold {
            state.opened_at = Some(self.clock.now());
            warn!(
                failure_count = state.failure_count,
                threshold = self.threshold,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit breaker opened, suspending dispatch"
            );
            true
        } else {
            false
        }
    }

    fn poll_open(&self) -> bool {
        let mut state = self.lock_state();
        match state.opened_at {
            Some(opened_at) => {
                if self.clock.now().duration_since(opened_at) >= self.cooldown {
                    state.opened_at = None;
                    state.failure_count = 0;
                    info!("circuit breaker cooldown elapsed, resuming dispatch");
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // Never held across an await; recover from poisoning instead of
        // propagating it.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
