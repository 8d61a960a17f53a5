//! # Durable Item Store
//!
//! Database persistence for queued sync items and dead-lettered items.
//!
//! ## Overview
//!
//! The store is the source of truth across restarts: the queue manager
//! rehydrates its in-memory order from `list_active` at startup. An item
//! exists in exactly one of the active table or the dead-letter table;
//! `move_to_dead_letter` enforces this transactionally.
//!
//! Storage failures are fatal for the current operation and propagate to the
//! caller. The queue never retries a storage error; silently losing a
//! persistence write would break at-least-once delivery.

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::error::{OutboxError, Result};
use crate::item::{DeadLetterEntry, ItemStatus, SyncItem, SyncItemId, SyncKind};

/// Repository trait for persisting the outbox queue
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a new sync item
    async fn add_item(&self, item: &SyncItem) -> Result<()>;

    /// Update an existing sync item
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::ItemNotFound`] if the item is not in the active
    /// table, or a database error if the write fails.
    async fn update_item(&self, item: &SyncItem) -> Result<()>;

    /// Remove a delivered item from the active table
    async fn delete_item(&self, id: SyncItemId) -> Result<()>;

    /// List active items with the given status, in enqueue order
    async fn list_items(&self, status: ItemStatus) -> Result<Vec<SyncItem>>;

    /// List all items still in the active table, in enqueue order
    async fn list_active(&self) -> Result<Vec<SyncItem>>;

    /// Count active items with the given status
    async fn count_by_status(&self, status: ItemStatus) -> Result<u64>;

    /// Move an item from the active table to the dead-letter table
    ///
    /// The insert and delete happen in one transaction so the item is never
    /// present in both tables.
    async fn move_to_dead_letter(&self, item: &SyncItem, moved_at: i64) -> Result<()>;

    /// List all dead-lettered entries, most recently moved first
    async fn list_dead_letter(&self) -> Result<Vec<DeadLetterEntry>>;
}

/// SQLite implementation of the item store
pub struct SqliteItemStore {
    pool: SqlitePool,
}

impl SqliteItemStore {
    /// Create a new store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize database tables if they don't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                enqueued_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_dead_letter (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                retry_count INTEGER NOT NULL,
                last_error TEXT,
                enqueued_at INTEGER NOT NULL,
                moved_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_items_status
            ON outbox_items(status, enqueued_at ASC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        Ok(())
    }
}

fn encode_payload(payload: &serde_json::Value) -> Result<String> {
    serde_json::to_string(payload)
        .map_err(|e| OutboxError::Database(format!("payload encode: {e}")))
}

fn item_from_row(row: &SqliteRow) -> Result<SyncItem> {
    let payload: String = row.get("payload");
    Ok(SyncItem {
        id: SyncItemId::from_string(&row.get::<String, _>("id"))?,
        kind: row.get::<String, _>("kind").parse::<SyncKind>()?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| OutboxError::Database(format!("payload decode: {e}")))?,
        status: row.get::<String, _>("status").parse::<ItemStatus>()?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        last_error: row.get("last_error"),
        enqueued_at: row.get("enqueued_at"),
        updated_at: row.get("updated_at"),
    })
}

fn dead_letter_from_row(row: &SqliteRow) -> Result<DeadLetterEntry> {
    let payload: String = row.get("payload");
    Ok(DeadLetterEntry {
        id: SyncItemId::from_string(&row.get::<String, _>("id"))?,
        kind: row.get::<String, _>("kind").parse::<SyncKind>()?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| OutboxError::Database(format!("payload decode: {e}")))?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        last_error: row.get("last_error"),
        enqueued_at: row.get("enqueued_at"),
        moved_at: row.get("moved_at"),
    })
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn add_item(&self, item: &SyncItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_items (
                id, kind, payload, status, retry_count, last_error, enqueued_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.as_str())
        .bind(item.kind.as_str())
        .bind(encode_payload(&item.payload)?)
        .bind(item.status.as_str())
        .bind(item.retry_count as i64)
        .bind(&item.last_error)
        .bind(item.enqueued_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update_item(&self, item: &SyncItem) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_items SET
                status = ?,
                retry_count = ?,
                last_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.status.as_str())
        .bind(item.retry_count as i64)
        .bind(&item.last_error)
        .bind(item.updated_at)
        .bind(item.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::ItemNotFound {
                item_id: item.id.to_string(),
            });
        }

        Ok(())
    }

    async fn delete_item(&self, id: SyncItemId) -> Result<()> {
        let result = sqlx::query("DELETE FROM outbox_items WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::ItemNotFound {
                item_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn list_items(&self, status: ItemStatus) -> Result<Vec<SyncItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, payload, status, retry_count, last_error, enqueued_at, updated_at
            FROM outbox_items
            WHERE status = ?
            ORDER BY enqueued_at ASC, rowid ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn list_active(&self) -> Result<Vec<SyncItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, payload, status, retry_count, last_error, enqueued_at, updated_at
            FROM outbox_items
            ORDER BY enqueued_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn count_by_status(&self, status: ItemStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_items WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

        Ok(count as u64)
    }

    async fn move_to_dead_letter(&self, item: &SyncItem, moved_at: i64) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO outbox_dead_letter (
                id, kind, payload, retry_count, last_error, enqueued_at, moved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.as_str())
        .bind(item.kind.as_str())
        .bind(encode_payload(&item.payload)?)
        .bind(item.retry_count as i64)
        .bind(&item.last_error)
        .bind(item.enqueued_at)
        .bind(moved_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        let deleted = sqlx::query("DELETE FROM outbox_items WHERE id = ?")
            .bind(item.id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

        if deleted.rows_affected() == 0 {
            // Dropping the transaction rolls back the insert.
            return Err(OutboxError::ItemNotFound {
                item_id: item.id.to_string(),
            });
        }

        tx.commit()
            .await
            .map_err(|e| OutboxError::Database(e.to_string()))?;

        Ok(())
    }

    async fn list_dead_letter(&self) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, payload, retry_count, last_error, enqueued_at, moved_at
            FROM outbox_dead_letter
            ORDER BY moved_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Database(e.to_string()))?;

        rows.iter().map(dead_letter_from_row).collect()
    }
}
