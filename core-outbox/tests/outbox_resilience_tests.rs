//! Integration tests for the outbox resilience layer
//!
//! These tests verify the end-to-end behavior of the sync queue against a
//! scripted remote client backed by an in-memory SQLite store:
//! - At-least-once delivery and attempt accounting
//! - Circuit breaker trip, suspension, and cooldown recovery
//! - Tail-requeue retries and dead-letter escalation
//! - Queue rehydration from the durable store across instances

use async_trait::async_trait;
use core_outbox::{
    ItemStatus, ItemStore, OutboxConfig, OutboxError, RemoteSyncClient, SqliteItemStore,
    SyncItemId, SyncKind, SyncQueue,
};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Scripted Remote Client
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Deliver,
    Fail,
}

/// Remote client that consumes a scripted outcome per call, then falls back
/// to a fixed outcome; every kind shares the one script.
struct ScriptedRemote {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    latency: Duration,
    calls: AtomicU64,
}

impl ScriptedRemote {
    fn always_ok(latency: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Outcome::Deliver,
            latency,
            calls: AtomicU64::new(0),
        }
    }

    fn always_fail(latency: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Outcome::Fail,
            latency,
            calls: AtomicU64::new(0),
        }
    }

    fn fail_times_then_ok(failures: usize) -> Self {
        Self {
            script: Mutex::new(vec![Outcome::Fail; failures].into()),
            fallback: Outcome::Deliver,
            latency: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn handle(&self) -> core_outbox::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match outcome {
            Outcome::Deliver => Ok(()),
            Outcome::Fail => Err(OutboxError::Remote("simulated remote failure".to_string())),
        }
    }
}

#[async_trait]
impl RemoteSyncClient for ScriptedRemote {
    async fn create_session(&self, _item_id: SyncItemId, _payload: &Value) -> core_outbox::Result<()> {
        self.handle().await
    }

    async fn update_session(&self, _item_id: SyncItemId, _payload: &Value) -> core_outbox::Result<()> {
        self.handle().await
    }

    async fn submit_answer(&self, _item_id: SyncItemId, _payload: &Value) -> core_outbox::Result<()> {
        self.handle().await
    }

    async fn save_statistics(&self, _item_id: SyncItemId, _payload: &Value) -> core_outbox::Result<()> {
        self.handle().await
    }

    async fn update_progress(&self, _item_id: SyncItemId, _payload: &Value) -> core_outbox::Result<()> {
        self.handle().await
    }
}

// ============================================================================
// Test Utilities
// ============================================================================

async fn test_store() -> Arc<SqliteItemStore> {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteItemStore::new(pool);
    store.initialize().await.unwrap();
    Arc::new(store)
}

async fn test_queue(remote: Arc<ScriptedRemote>, config: OutboxConfig) -> (SyncQueue, Arc<SqliteItemStore>) {
    let store = test_store().await;
    let queue = SyncQueue::new(store.clone(), remote, config).await.unwrap();
    (queue, store)
}

/// Poll until the background drain has tripped the breaker and settled.
async fn wait_for_breaker_open(queue: &SyncQueue) {
    for _ in 0..300 {
        let status = queue.queue_status().await.unwrap();
        if status.circuit_breaker_open && status.in_flight == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("breaker did not open within 3s");
}

/// Poll until the active queue is fully drained.
async fn wait_for_empty(queue: &SyncQueue) {
    for _ in 0..300 {
        if queue.queue_status().await.unwrap().total == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not drain within 3s");
}

// ============================================================================
// Single item, healthy remote
// ============================================================================

#[tokio::test]
async fn test_single_item_delivered_with_latency() {
    let remote = Arc::new(ScriptedRemote::always_ok(Duration::from_millis(50)));
    let (queue, _store) = test_queue(remote.clone(), OutboxConfig::default()).await;

    queue
        .enqueue(SyncKind::AnswerSubmit, json!({"card": 42, "answer": "b"}))
        .await
        .unwrap();
    queue.shutdown().await;

    let status = queue.queue_status().await.unwrap();
    assert_eq!(status.total, 0);
    assert!(!status.circuit_breaker_open);

    let metrics = queue.metrics();
    assert_eq!(metrics.successful_syncs, 1);
    assert_eq!(metrics.failed_syncs, 0);
    assert_eq!(metrics.total_attempts, 1);
    assert!(metrics.average_latency_ms >= 50.0);
    assert_eq!(metrics.success_rate, 1.0);
    assert_eq!(metrics.reliability, 1.0);
}

// ============================================================================
// Failing remote trips the breaker, rest of queue untouched
// ============================================================================

#[tokio::test]
async fn test_breaker_opens_and_remaining_items_stay_pending() {
    // The per-call latency lets all ten enqueues land before the drain loop
    // gets past the first item.
    let remote = Arc::new(ScriptedRemote::always_fail(Duration::from_millis(20)));
    let (queue, store) = test_queue(remote.clone(), OutboxConfig::default()).await;

    for i in 0..10 {
        queue
            .enqueue(SyncKind::ProgressUpdate, json!({"lesson": i}))
            .await
            .unwrap();
    }

    // The breaker opens after exactly the threshold of consecutive failures.
    wait_for_breaker_open(&queue).await;
    queue.shutdown().await;

    assert_eq!(remote.calls(), 5);
    let metrics = queue.metrics();
    assert_eq!(metrics.total_attempts, 5);
    assert_eq!(metrics.failed_syncs, 5);
    assert_eq!(metrics.successful_syncs, 0);
    assert_eq!(metrics.circuit_breaker_trips, 1);

    // Everything is still queued: five items with one failed attempt each,
    // five never dispatched at all.
    let status = queue.queue_status().await.unwrap();
    assert_eq!(status.pending, 10);
    assert_eq!(status.total, 10);
    assert!(queue.dead_letters().await.unwrap().is_empty());

    let pending = store.list_items(ItemStatus::Pending).await.unwrap();
    let untouched = pending.iter().filter(|i| i.retry_count == 0).count();
    let retried = pending.iter().filter(|i| i.retry_count == 1).count();
    assert_eq!(untouched, 5);
    assert_eq!(retried, 5);
}

#[tokio::test]
async fn test_no_dispatch_while_breaker_open() {
    let remote = Arc::new(ScriptedRemote::always_fail(Duration::ZERO));
    let config = OutboxConfig {
        breaker_threshold: 2,
        ..OutboxConfig::default()
    };
    let (queue, _store) = test_queue(remote.clone(), config).await;

    queue
        .enqueue(SyncKind::SessionUpdate, json!({"score": 10}))
        .await
        .unwrap();
    wait_for_breaker_open(&queue).await;
    queue.shutdown().await;
    let calls_when_open = remote.calls();

    // Enqueue while open: the item is persisted but nothing is dispatched.
    queue
        .enqueue(SyncKind::SessionUpdate, json!({"score": 20}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(remote.calls(), calls_when_open);
    assert_eq!(queue.queue_status().await.unwrap().pending, 2);
}

// ============================================================================
// Transient failures stay below the retry budget
// ============================================================================

#[tokio::test]
async fn test_item_recovers_before_retry_budget() {
    let remote = Arc::new(ScriptedRemote::fail_times_then_ok(2));
    let (queue, _store) = test_queue(remote.clone(), OutboxConfig::default()).await;

    queue
        .enqueue(SyncKind::SessionCreate, json!({"deck": "jlpt-n3"}))
        .await
        .unwrap();
    queue.shutdown().await;

    let metrics = queue.metrics();
    assert_eq!(metrics.total_attempts, 3);
    assert_eq!(metrics.failed_syncs, 2);
    assert_eq!(metrics.successful_syncs, 1);

    // Recovered before the budget: removed as successful, never dead-lettered.
    assert_eq!(queue.queue_status().await.unwrap().total, 0);
    assert!(queue.dead_letters().await.unwrap().is_empty());
}

// ============================================================================
// Retry budget exhausted, item dead-lettered
// ============================================================================

#[tokio::test]
async fn test_exhausted_item_moves_to_dead_letter() {
    let remote = Arc::new(ScriptedRemote::always_fail(Duration::ZERO));
    let config = OutboxConfig {
        // Keep the breaker out of the way so the retry budget is the limit.
        breaker_threshold: 10,
        ..OutboxConfig::default()
    };
    let (queue, _store) = test_queue(remote.clone(), config).await;

    let id = queue
        .enqueue(SyncKind::StatisticsSave, json!({"accuracy": 0.91}))
        .await
        .unwrap();
    queue.shutdown().await;

    assert_eq!(remote.calls(), 3);
    assert_eq!(queue.queue_status().await.unwrap().total, 0);

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].retry_count, 3);
    assert_eq!(dead[0].kind, SyncKind::StatisticsSave);
    assert_eq!(dead[0].last_error.as_deref(), Some("Remote sync failed: simulated remote failure"));
    assert!(dead[0].moved_at >= dead[0].enqueued_at);

    // Dead-lettered items never return to the active queue automatically.
    queue.drain().await.unwrap();
    assert_eq!(remote.calls(), 3);
    assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
}

// ============================================================================
// Cooldown elapses, processing resumes
// ============================================================================

#[tokio::test]
async fn test_cooldown_reopens_dispatch() {
    let remote = Arc::new(ScriptedRemote::fail_times_then_ok(2));
    let config = OutboxConfig {
        max_retries: 5,
        breaker_threshold: 2,
        breaker_cooldown: Duration::from_millis(500),
    };
    let (queue, _store) = test_queue(remote.clone(), config).await;

    queue
        .enqueue(SyncKind::AnswerSubmit, json!({"card": 7, "answer": "d"}))
        .await
        .unwrap();
    queue.shutdown().await;

    let status = queue.queue_status().await.unwrap();
    assert!(status.circuit_breaker_open);
    assert_eq!(status.pending, 1);
    assert_eq!(queue.metrics().total_attempts, 2);

    tokio::time::sleep(Duration::from_millis(600)).await;

    // Cooldown has elapsed: drain resumes and the item goes through.
    queue.drain().await.unwrap();

    let status = queue.queue_status().await.unwrap();
    assert!(!status.circuit_breaker_open);
    assert_eq!(status.total, 0);

    let metrics = queue.metrics();
    assert_eq!(metrics.successful_syncs, 1);
    assert_eq!(metrics.circuit_breaker_trips, 1);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_at_least_one_attempt_per_enqueued_item() {
    let remote = Arc::new(ScriptedRemote::always_ok(Duration::ZERO));
    let (queue, _store) = test_queue(remote.clone(), OutboxConfig::default()).await;

    let kinds = [
        SyncKind::SessionCreate,
        SyncKind::AnswerSubmit,
        SyncKind::AnswerSubmit,
        SyncKind::ProgressUpdate,
        SyncKind::StatisticsSave,
        SyncKind::SessionUpdate,
    ];
    for (i, kind) in kinds.iter().enumerate() {
        queue.enqueue(*kind, json!({"seq": i})).await.unwrap();
    }

    wait_for_empty(&queue).await;
    queue.shutdown().await;

    let metrics = queue.metrics();
    assert!(metrics.total_attempts >= kinds.len() as u64);
    assert_eq!(metrics.successful_syncs, kinds.len() as u64);
    assert_eq!(remote.calls(), kinds.len() as u64);
}

#[tokio::test]
async fn test_concurrent_enqueues_are_never_stranded() {
    // Zero-latency deliveries make drain loops exit and restart constantly,
    // interleaving drain exits with pushes from other tasks. Every item must
    // still be delivered without any rescuing enqueue or manual drain
    // afterwards.
    let remote = Arc::new(ScriptedRemote::always_ok(Duration::ZERO));
    let (queue, _store) = test_queue(remote.clone(), OutboxConfig::default()).await;

    let mut producers = Vec::new();
    for task in 0..4 {
        let queue = queue.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..25 {
                queue
                    .enqueue(SyncKind::AnswerSubmit, json!({"task": task, "seq": i}))
                    .await
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    wait_for_empty(&queue).await;
    queue.shutdown().await;

    assert_eq!(queue.metrics().successful_syncs, 100);
    assert_eq!(remote.calls(), 100);
}

#[tokio::test]
async fn test_shutdown_waits_for_active_drain() {
    // Per-call latency keeps a drain in flight while the second enqueue
    // lands; shutdown must join whichever drain is actually current, so no
    // polling is needed before the assertions.
    let remote = Arc::new(ScriptedRemote::always_ok(Duration::from_millis(30)));
    let (queue, _store) = test_queue(remote.clone(), OutboxConfig::default()).await;

    let mut producers = Vec::new();
    for i in 0..2 {
        let queue = queue.clone();
        producers.push(tokio::spawn(async move {
            queue
                .enqueue(SyncKind::ProgressUpdate, json!({"lesson": i}))
                .await
                .unwrap();
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    queue.shutdown().await;

    assert_eq!(queue.queue_status().await.unwrap().total, 0);
    assert_eq!(queue.metrics().successful_syncs, 2);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let store = test_store().await;

    // First instance: the remote is down, the item stays queued.
    let down = Arc::new(ScriptedRemote::always_fail(Duration::ZERO));
    let config = OutboxConfig {
        breaker_threshold: 1,
        ..OutboxConfig::default()
    };
    let queue = SyncQueue::new(store.clone(), down.clone(), config)
        .await
        .unwrap();
    queue
        .enqueue(SyncKind::ProgressUpdate, json!({"lesson": 3}))
        .await
        .unwrap();
    queue.shutdown().await;
    assert_eq!(queue.queue_status().await.unwrap().pending, 1);
    drop(queue);

    // Second instance over the same store: rehydrates and delivers.
    let up = Arc::new(ScriptedRemote::always_ok(Duration::ZERO));
    let queue = SyncQueue::new(store, up.clone(), OutboxConfig::default())
        .await
        .unwrap();
    assert_eq!(queue.queue_status().await.unwrap().pending, 1);

    queue.drain().await.unwrap();
    assert_eq!(queue.queue_status().await.unwrap().total, 0);
    assert_eq!(up.calls(), 1);
}
