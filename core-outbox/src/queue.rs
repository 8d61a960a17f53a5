//! # Sync Queue Manager
//!
//! Orchestrates enqueue and ordered processing of sync items, applying the
//! circuit breaker and the retry policy.
//!
//! ## Overview
//!
//! Producers call [`SyncQueue::enqueue`]; the item is persisted before the
//! call returns, and a background drain task starts if the breaker is closed
//! and no drain is already active. The drain loop processes head-to-tail, one
//! item at a time, awaiting the remote outcome before starting the next; the
//! remote call is the only suspension point per item. Persistence writes are
//! awaited in sequence, never fire-and-forget, so a crash between a remote
//! success and the persisted removal can duplicate a delivery but never lose
//! one.
//!
//! ## Guarantees
//!
//! - At-most-one drain loop per queue instance (atomic re-entrancy flag).
//! - The breaker gate is checked before every single dispatch; a mid-loop
//!   trip halts the loop immediately, and remaining items stay pending.
//! - A retry-eligible failed item is re-appended to the tail, not retried at
//!   the head, so one troublesome item cannot block the rest of the queue.
//! - No cross-kind ordering: producers needing session-create before a later
//!   answer-submit must enforce that ordering themselves.
//!
//! Independent queue instances share no state and may run concurrently.
//!
//! ## Usage
//!
//! ```ignore
//! use core_outbox::{OutboxConfig, SyncKind, SyncQueue};
//!
//! # async fn example(store: std::sync::Arc<dyn core_outbox::ItemStore>,
//! #                  remote: std::sync::Arc<dyn core_outbox::RemoteSyncClient>)
//! #     -> core_outbox::Result<()> {
//! let queue = SyncQueue::new(store, remote, OutboxConfig::default()).await?;
//! let id = queue.enqueue(SyncKind::AnswerSubmit, serde_json::json!({"answer": "b"})).await?;
//!
//! // Poll the observability surface to drive UI state.
//! let status = queue.queue_status().await?;
//! let metrics = queue.metrics();
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{OutboxError, Result};
use crate::item::{DeadLetterEntry, ItemStatus, SyncItem, SyncItemId, SyncKind};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::remote::RemoteSyncClient;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::ItemStore;

/// Queue manager configuration
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Failed attempts before an item is dead-lettered
    pub max_retries: u32,
    /// Consecutive failures before the breaker opens
    pub breaker_threshold: u32,
    /// How long the breaker stays open before dispatch resumes
    pub breaker_cooldown: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_millis(5000),
        }
    }
}

/// Point-in-time view of the active queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Items waiting to be dispatched
    pub pending: u64,
    /// Items currently being dispatched
    pub in_flight: u64,
    /// Items whose last attempt failed and that have not been requeued yet
    ///
    /// Transient: a failed item is requeued or dead-lettered within the same
    /// loop iteration, so this is non-zero mainly after a crash between the
    /// failure write and the requeue write. Not a count worth polling for.
    pub failed: u64,
    /// All items still in the active queue
    pub total: u64,
    /// Whether dispatch is currently suspended
    pub circuit_breaker_open: bool,
}

/// Client-side resilience layer reconciling local actions with the remote
/// service
///
/// Cheap to clone via the shared inner state; all mutation of the active
/// queue and the breaker happens in `enqueue` and the single drain loop.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    store: Arc<dyn ItemStore>,
    remote: Arc<dyn RemoteSyncClient>,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    metrics: MetricsCollector,
    queue: Mutex<VecDeque<SyncItem>>,
    draining: AtomicBool,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the re-entrancy flag when a drain loop exits, on any path. The
/// empty-queue exit already clears the flag under the queue lock; this
/// covers the breaker-open and storage-error exits, and the second store
/// is harmless.
struct DrainActive<'a> {
    flag: &'a AtomicBool,
}

impl Drop for DrainActive<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl SyncQueue {
    /// Create a queue manager, rehydrating its order from the store
    ///
    /// The store is the source of truth on restart. Items found in-flight
    /// (interrupted by a crash mid-dispatch) or failed (interrupted between
    /// the failure write and the requeue write) are reset to pending; they
    /// will be dispatched again, which at-least-once delivery permits.
    pub async fn new(
        store: Arc<dyn ItemStore>,
        remote: Arc<dyn RemoteSyncClient>,
        config: OutboxConfig,
    ) -> Result<Self> {
        let mut items = store.list_active().await?;
        for item in &mut items {
            if item.status != ItemStatus::Pending {
                warn!(
                    item_id = %item.id,
                    status = %item.status,
                    "interrupted sync item reset to pending"
                );
                item.requeue();
                store.update_item(item).await?;
            }
        }
        if !items.is_empty() {
            info!(count = items.len(), "rehydrated outbox queue from store");
        }

        Ok(Self {
            inner: Arc::new(QueueInner {
                store,
                remote,
                policy: RetryPolicy::new(config.max_retries),
                breaker: CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown),
                metrics: MetricsCollector::new(),
                queue: Mutex::new(items.into()),
                draining: AtomicBool::new(false),
                drain_task: Mutex::new(None),
            }),
        })
    }

    /// Persist a new item and append it to the tail of the queue
    ///
    /// The payload must be present; `kind` is constrained to recognized
    /// values by the type. If the breaker is closed and no drain is active, a
    /// background drain task starts; the caller is never blocked on
    /// processing, and later failures of this item surface only through the
    /// observability surface.
    pub async fn enqueue(&self, kind: SyncKind, payload: Value) -> Result<SyncItemId> {
        if payload.is_null() {
            return Err(OutboxError::EmptyPayload);
        }

        let item = SyncItem::new(kind, payload);
        let id = item.id;

        self.inner.store.add_item(&item).await?;
        self.inner.queue.lock().await.push_back(item);
        info!(item_id = %id, kind = %kind, "enqueued sync item");

        if self.inner.breaker.can_dispatch() {
            self.spawn_drain().await;
        }

        Ok(id)
    }

    /// Run the drain loop on the caller's task
    ///
    /// Processes until the queue empties or the breaker opens. Returns
    /// immediately if another drain is already active. A circuit-open
    /// rejection is not an error; pending items simply stay queued until the
    /// cooldown elapses and drain is entered again.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; remote failures are recorded, never
    /// returned.
    pub async fn drain(&self) -> Result<()> {
        if !self.inner.begin_drain() {
            debug!("drain already active, skipping");
            return Ok(());
        }
        let _active = DrainActive {
            flag: &self.inner.draining,
        };
        self.inner.run_drain().await
    }

    /// Snapshot of the metrics counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Counts of active items by status, plus the breaker gate
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let pending = self.inner.store.count_by_status(ItemStatus::Pending).await?;
        let in_flight = self
            .inner
            .store
            .count_by_status(ItemStatus::InFlight)
            .await?;
        let failed = self.inner.store.count_by_status(ItemStatus::Failed).await?;

        Ok(QueueStatus {
            pending,
            in_flight,
            failed,
            total: pending + in_flight + failed,
            circuit_breaker_open: self.inner.breaker.is_open(),
        })
    }

    /// Items that exhausted their retry budget, most recently moved first
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        self.inner.store.list_dead_letter().await
    }

    /// Wait for any in-flight background drain to finish
    pub async fn shutdown(&self) {
        let handle = self.inner.drain_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "background drain task terminated abnormally");
            }
        }
    }

    async fn spawn_drain(&self) {
        if !self.inner.begin_drain() {
            return;
        }
        // Held across the spawn so the stored handle is always the newest
        // drain.
        let mut slot = self.inner.drain_task.lock().await;
        let inner = self.inner.clone();
        *slot = Some(tokio::spawn(async move {
            let _active = DrainActive {
                flag: &inner.draining,
            };
            if let Err(e) = inner.run_drain().await {
                error!(error = %e, "drain loop aborted on storage failure");
            }
        }));
    }
}

impl QueueInner {
    fn begin_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn run_drain(&self) -> Result<()> {
        loop {
            // Checked before every dispatch so a mid-loop trip halts here.
            if !self.breaker.can_dispatch() {
                debug!("circuit breaker open, drain suspended");
                break;
            }

            let mut item = {
                let mut queue = self.queue.lock().await;
                match queue.pop_front() {
                    Some(item) => item,
                    None => {
                        // The flag must drop while the queue lock is still
                        // held: a concurrent enqueue either observes the
                        // cleared flag and starts its own drain, or its push
                        // landed before this check and is popped by this
                        // loop.
                        self.draining.store(false, Ordering::Release);
                        break;
                    }
                }
            };

            item.start_dispatch();
            self.store.update_item(&item).await?;
            self.metrics.record_attempt();

            let started = Instant::now();
            match self.dispatch(&item).await {
                Ok(()) => {
                    let latency = started.elapsed();
                    self.breaker.record_success();
                    self.metrics.record_success(latency);
                    self.store.delete_item(item.id).await?;
                    debug!(
                        item_id = %item.id,
                        kind = %item.kind,
                        latency_ms = latency.as_millis() as u64,
                        "sync item delivered"
                    );
                }
                Err(e) => {
                    self.metrics.record_failure();
                    if self.breaker.record_failure() {
                        self.metrics.record_trip();
                    }

                    item.fail(e.to_string());
                    self.store.update_item(&item).await?;

                    match self.policy.decide(&item) {
                        RetryDecision::DeadLetter => {
                            let moved_at = chrono::Utc::now().timestamp_millis();
                            self.store.move_to_dead_letter(&item, moved_at).await?;
                            warn!(
                                item_id = %item.id,
                                kind = %item.kind,
                                retry_count = item.retry_count,
                                error = ?item.last_error,
                                "retry budget exhausted, sync item dead-lettered"
                            );
                        }
                        RetryDecision::Requeue => {
                            warn!(
                                item_id = %item.id,
                                kind = %item.kind,
                                retry_count = item.retry_count,
                                "sync item failed, re-appended to tail"
                            );
                            item.requeue();
                            self.store.update_item(&item).await?;
                            self.queue.lock().await.push_back(item);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&self, item: &SyncItem) -> Result<()> {
        match item.kind {
            SyncKind::SessionCreate => self.remote.create_session(item.id, &item.payload).await,
            SyncKind::SessionUpdate => self.remote.update_session(item.id, &item.payload).await,
            SyncKind::AnswerSubmit => self.remote.submit_answer(item.id, &item.payload).await,
            SyncKind::StatisticsSave => self.remote.save_statistics(item.id, &item.payload).await,
            SyncKind::ProgressUpdate => self.remote.update_progress(item.id, &item.payload).await,
        }
    }
}
