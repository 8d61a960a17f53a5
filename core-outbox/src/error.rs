use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Sync item {item_id} not found")]
    ItemNotFound { item_id: String },

    #[error("Remote sync failed: {0}")]
    Remote(String),

    #[error("Invalid item ID: {0}")]
    InvalidItemId(String),

    #[error("Invalid item status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync kind: {0}")]
    InvalidKind(String),

    #[error("Sync payload must be present")]
    EmptyPayload,

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, OutboxError>;
