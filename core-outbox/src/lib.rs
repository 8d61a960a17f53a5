//! # Offline Sync Outbox
//!
//! Client-side resilience layer that reconciles locally-recorded study
//! actions with the remote authority service under intermittent connectivity.
//!
//! ## Overview
//!
//! This crate manages the lifecycle of queued sync items, including:
//! - Persisting items durably so the queue survives restarts
//! - Dispatching items head-to-tail through a per-kind `RemoteSyncClient`
//! - Suspending dispatch behind a circuit breaker after repeated failures
//! - Retrying failed items at the tail, escalating to a dead-letter store
//!   once the retry budget is exhausted
//! - Aggregating counters and latencies for the observability surface
//!
//! ## Components
//!
//! - **Sync Item Model** (`item`): item, kind, and status types with validated
//!   state transitions
//! - **Durable Item Store** (`store`): database persistence for queued and
//!   dead-lettered items
//! - **Remote Sync Client** (`remote`): contract for the per-kind network
//!   operations (idempotent by item id)
//! - **Circuit Breaker** (`breaker`): dispatch gate with cooldown-based
//!   recovery over an injectable clock
//! - **Retry Policy** (`retry`): retry-requeue versus dead-letter decision
//! - **Metrics Collector** (`metrics`): per-queue counters and derived rates
//! - **Sync Queue Manager** (`queue`): orchestrates enqueue and the single
//!   drain loop

pub mod breaker;
pub mod error;
pub mod item;
pub mod metrics;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod store;

pub use breaker::{CircuitBreaker, Clock, SystemClock};
pub use error::{OutboxError, Result};
pub use item::{DeadLetterEntry, ItemStatus, SyncItem, SyncItemId, SyncKind};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use queue::{OutboxConfig, QueueStatus, SyncQueue};
pub use remote::RemoteSyncClient;
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{ItemStore, SqliteItemStore};
