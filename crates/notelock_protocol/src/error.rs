//! Error types for the protocol layer.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The envelope failed authentication (MAC mismatch, embedded UUID
    /// mismatch, or a required auth hash was absent).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The envelope string had an unexpected shape.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope declares a protocol version newer than this library.
    #[error("protocol version {0} is newer than this client supports")]
    UnsupportedVersion(String),

    /// Encrypting with a read-only protocol version was requested.
    #[error("protocol version {0} is read-only")]
    ReadOnlyVersion(String),

    /// The key derivation cost is below the version's minimum.
    #[error("key derivation cost {cost} is below the minimum {minimum} for version {version}")]
    CostTooLow {
        /// The advertised cost.
        cost: u32,
        /// The minimum for the version.
        minimum: u32,
        /// The protocol version string.
        version: String,
    },

    /// A required auth parameter was absent.
    #[error("missing auth parameter: {0}")]
    MissingParameter(&'static str),

    /// An encrypted record carried no wrapped item key.
    #[error("encrypted item carries no item key")]
    MissingItemKey,

    /// Underlying crypto failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] notelock_crypto::CryptoError),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an authentication failure.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed(message.into())
    }

    /// Creates a malformed envelope error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope(message.into())
    }
}
