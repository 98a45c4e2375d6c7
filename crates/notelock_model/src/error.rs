//! Error types for the model layer.

use thiserror::Error;
use uuid::Uuid;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in the item model and store.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No item with the given UUID is present.
    #[error("item not found: {uuid}")]
    ItemNotFound {
        /// The UUID that was looked up.
        uuid: Uuid,
    },

    /// The local persistence adapter failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Protocol-level failure while handling a record.
    #[error("protocol error: {0}")]
    Protocol(#[from] notelock_protocol::ProtocolError),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation was attempted on content that never decrypted.
    #[error("item {uuid} content is opaque (error decrypting)")]
    OpaqueContent {
        /// The affected item.
        uuid: Uuid,
    },
}

impl ModelError {
    /// Creates an item-not-found error.
    pub fn not_found(uuid: Uuid) -> Self {
        Self::ItemNotFound { uuid }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }
}
