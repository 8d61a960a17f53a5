//! # Remote Sync Client
//!
//! Contract for the network operation behind each sync item kind.
//!
//! Delivery is at-least-once: an item whose remote call succeeded but whose
//! removal was not persisted before a crash will be dispatched again after
//! restart. Every operation must therefore be idempotent by item id; the
//! queue manager performs no deduplication itself.
//!
//! Implementations are expected to carry their own per-call timeout; a
//! timeout surfaces as an ordinary error and counts against the retry budget
//! and the circuit breaker like any other failure.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::item::SyncItemId;

/// Client for the remote authority service, one method per sync kind
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    /// Create a review session
    async fn create_session(&self, item_id: SyncItemId, payload: &Value) -> Result<()>;

    /// Update a review session
    async fn update_session(&self, item_id: SyncItemId, payload: &Value) -> Result<()>;

    /// Submit a recorded answer
    async fn submit_answer(&self, item_id: SyncItemId, payload: &Value) -> Result<()>;

    /// Save aggregated statistics
    async fn save_statistics(&self, item_id: SyncItemId, payload: &Value) -> Result<()>;

    /// Update study progress
    async fn update_progress(&self, item_id: SyncItemId, payload: &Value) -> Result<()>;
}
