//! # Retry / Dead-Letter Policy
//!
//! Decides whether a failed item goes back to the tail of the queue or is
//! escalated to the dead-letter store.
//!
//! Retries carry no per-item backoff delay; backpressure is emergent from
//! circuit-breaker trips. Re-appending retries to the tail instead of the
//! head trades FIFO ordering across retries for freedom from head-of-line
//! blocking: one troublesome item cannot stall the items behind it.

use crate::item::SyncItem;

/// Outcome of the policy for one failed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-append to the tail of the active queue for another attempt
    Requeue,
    /// Retry budget exhausted, move to the dead-letter store
    DeadLetter,
}

/// Policy applied by the queue manager after every failed attempt
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    /// Create a policy with the given retry budget
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide the fate of an item whose failure was already recorded
    ///
    /// Expects `retry_count` to already include the attempt that just failed.
    pub fn decide(&self, item: &SyncItem) -> RetryDecision {
        if item.retry_count >= self.max_retries {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Requeue
        }
    }
}
