//! Wire records for the `/items/sync` endpoint.

use crate::auth_params::AuthParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Path of the sync endpoint relative to the account server.
pub const SYNC_ENDPOINT: &str = "/items/sync";

/// An item record as it appears on the wire and on disk.
///
/// `content` holds the envelope string; everything the server should not
/// see stays out of this record. `dirty` appears only in local disk
/// records, and is suppressed (set to `None`) when items are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    /// Item UUID.
    pub uuid: Uuid,
    /// Content-type tag, e.g. `"Note"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Envelope string (`000`/`001`/`002`/`003` prefixed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// The wrapped per-item key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc_item_key: Option<String>,
    /// Top-level auth hash (versions `001`; echoed for legacy records).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
    /// Key derivation parameters attached at encryption time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_params: Option<AuthParams>,
    /// Server-set creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Server-set modification timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Deletion marker.
    #[serde(default)]
    pub deleted: bool,
    /// Local-only dirty marker for disk records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
    /// Local-only marker persisting a decryption failure across loads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_decrypting: Option<bool>,
}

impl RawItem {
    /// Creates an empty record for the given UUID.
    #[must_use]
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            content_type: None,
            content: None,
            enc_item_key: None,
            auth_hash: None,
            auth_params: None,
            created_at: None,
            updated_at: None,
            deleted: false,
            dirty: None,
            error_decrypting: None,
        }
    }

    /// Whether the record carries none of the fields that make an item
    /// mappable (`content_type`, `content`, `uuid` is always present).
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.content_type.is_none() && self.content.is_none()
    }
}

/// Request body for `POST /items/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Items being pushed this round.
    pub items: Vec<RawItem>,
    /// Opaque token describing the client's knowledge of server state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// In-progress pagination cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
    /// Page size the client is willing to receive.
    pub limit: u32,
}

/// Response body from `POST /items/sync`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Items the server has seen change since the sync token.
    #[serde(default)]
    pub retrieved_items: Vec<RawItem>,
    /// Metadata echoes for items the client just pushed.
    #[serde(default)]
    pub saved_items: Vec<RawItem>,
    /// Items the server refused, with the conflict kind.
    #[serde(default)]
    pub unsaved: Vec<UnsavedItem>,
    /// New sync token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Pagination cursor; `None` means retrieval is complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_token: Option<String>,
}

/// An entry in the response's `unsaved` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsavedItem {
    /// The refused (or conflicting server-side) record.
    pub item: RawItem,
    /// Why the server refused.
    pub error: ConflictError,
}

/// The error object attached to an unsaved entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictError {
    /// Conflict kind.
    pub tag: ConflictTag,
}

/// The two conflict kinds the server reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictTag {
    /// The pushed UUID collides with a distinct server item.
    UuidConflict,
    /// The server's copy is newer than the pushed base.
    SyncConflict,
}
