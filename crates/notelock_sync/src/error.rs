//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The engine is locked (sign-out in progress); the call was
    /// rejected rather than queued.
    #[error("sync is locked")]
    Locked,

    /// Network or transport failure. The dirty set is retained; the
    /// next cycle retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server rejected the session (HTTP 401).
    #[error("session invalid")]
    SessionInvalid,

    /// Non-success HTTP status.
    #[error("server returned status {status}")]
    Http {
        /// The HTTP status code.
        status: u16,
    },

    /// Protocol-level failure (envelope, crypto, derivation).
    #[error("protocol error: {0}")]
    Protocol(#[from] notelock_protocol::ProtocolError),

    /// Model-level failure.
    #[error("model error: {0}")]
    Model(#[from] notelock_model::ModelError),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
