//! # Sync Item Model
//!
//! Data model for locally-recorded study actions awaiting delivery.
//!
//! ## State Machine
//!
//! ```text
//! Pending → InFlight → (removed on success)
//!              ↓
//!            Failed → Pending (retries remain, re-appended to tail)
//!              ↓
//!        DeadLettered (retry budget exhausted, terminal)
//! ```
//!
//! Status transitions are monotonic within one processing cycle and are only
//! driven by the queue manager; `retry_count` increments on failure and
//! nowhere else.

use crate::error::{OutboxError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Type-safe sync item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncItemId(Uuid);

impl SyncItemId {
    /// Create a new random sync item ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sync item ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| OutboxError::InvalidItemId(e.to_string()))
    }

    /// Get the string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Kind & Status Types
// ============================================================================

/// The remote operation a queued item maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncKind {
    /// Create a new review session on the remote service
    SessionCreate,
    /// Update an existing review session
    SessionUpdate,
    /// Submit a recorded answer
    AnswerSubmit,
    /// Save aggregated statistics
    StatisticsSave,
    /// Update study progress
    ProgressUpdate,
}

impl SyncKind {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::SessionCreate => "session-create",
            SyncKind::SessionUpdate => "session-update",
            SyncKind::AnswerSubmit => "answer-submit",
            SyncKind::StatisticsSave => "statistics-save",
            SyncKind::ProgressUpdate => "progress-update",
        }
    }
}

impl FromStr for SyncKind {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "session-create" => Ok(SyncKind::SessionCreate),
            "session-update" => Ok(SyncKind::SessionUpdate),
            "answer-submit" => Ok(SyncKind::AnswerSubmit),
            "statistics-save" => Ok(SyncKind::StatisticsSave),
            "progress-update" => Ok(SyncKind::ProgressUpdate),
            _ => Err(OutboxError::InvalidKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The current status of a sync item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    /// Item is queued and waiting to be dispatched
    Pending,
    /// Item is currently being dispatched to the remote service
    InFlight,
    /// The last dispatch attempt failed
    Failed,
    /// Item exhausted its retry budget and was moved to the dead-letter store
    DeadLettered,
}

impl ItemStatus {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InFlight => "in-flight",
            ItemStatus::Failed => "failed",
            ItemStatus::DeadLettered => "dead-lettered",
        }
    }

    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::DeadLettered)
    }
}

impl FromStr for ItemStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "in-flight" => Ok(ItemStatus::InFlight),
            "failed" => Ok(ItemStatus::Failed),
            "dead-lettered" => Ok(ItemStatus::DeadLettered),
            _ => Err(OutboxError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Sync Item
// ============================================================================

/// A locally-recorded action awaiting delivery to the remote service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    /// Unique identifier; the remote service deduplicates on it
    pub id: SyncItemId,
    /// Which remote operation this item maps to
    pub kind: SyncKind,
    /// Opaque payload forwarded to the remote client
    pub payload: Value,
    /// Current status
    pub status: ItemStatus,
    /// Number of failed dispatch attempts
    pub retry_count: u32,
    /// Error message from the last failed attempt
    pub last_error: Option<String>,
    /// Unix timestamp (ms) when the item was enqueued
    pub enqueued_at: i64,
    /// Unix timestamp (ms) when the item was last updated
    pub updated_at: i64,
}

impl SyncItem {
    /// Create a new pending sync item
    pub fn new(kind: SyncKind, payload: Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: SyncItemId::new(),
            kind,
            payload,
            status: ItemStatus::Pending,
            retry_count: 0,
            last_error: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    /// Mark the item as in-flight
    pub(crate) fn start_dispatch(&mut self) {
        self.status = ItemStatus::InFlight;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Record a failed dispatch attempt
    pub(crate) fn fail(&mut self, error: String) {
        self.retry_count += 1;
        self.last_error = Some(error);
        self.status = ItemStatus::Failed;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Return the item to the pending state for another attempt
    pub(crate) fn requeue(&mut self) {
        self.status = ItemStatus::Pending;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

// ============================================================================
// Dead Letter
// ============================================================================

/// A sync item that exhausted its retry budget
///
/// Dead-lettered entries are terminal and require external resolution; the
/// queue never retries them automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Original item identifier
    pub id: SyncItemId,
    /// Original operation kind
    pub kind: SyncKind,
    /// Original opaque payload
    pub payload: Value,
    /// Failed attempts at the time of escalation
    pub retry_count: u32,
    /// Error message from the final failed attempt
    pub last_error: Option<String>,
    /// Unix timestamp (ms) when the item was first enqueued
    pub enqueued_at: i64,
    /// Unix timestamp (ms) when the item was moved to the dead-letter store
    pub moved_at: i64,
}
