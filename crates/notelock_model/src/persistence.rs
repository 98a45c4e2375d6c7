//! Local persistence traits.
//!
//! The real adapters (SQLite, IndexedDB, files) live in host
//! applications; the library programs against these traits and ships
//! in-memory implementations for tests and ephemeral use.

use crate::error::{ModelError, ModelResult};
use notelock_crypto::{base64_decode_string, base64_encode};
use notelock_protocol::RawItem;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Well-known key/value store keys.
pub mod kv_keys {
    /// Account server URL.
    pub const SERVER: &str = "server";
    /// Sync token.
    pub const SYNC_TOKEN: &str = "syncToken";
    /// Pagination cursor token.
    pub const CURSOR_TOKEN: &str = "cursorToken";
    /// Hex master encryption key.
    pub const MK: &str = "mk";
    /// Hex master authentication key.
    pub const AK: &str = "ak";
    /// JSON auth params.
    pub const AUTH_PARAMS: &str = "auth_params";
    /// Bearer token for the account server.
    pub const JWT: &str = "jwt";
    /// Base64 JSON array of completed migration names.
    pub const MIGRATIONS: &str = "migrations";
    /// Prefix for the session-history recorder's keys (owned by an
    /// external collaborator).
    pub const SESSION_HISTORY_PREFIX: &str = "sessionHistory_";
}

/// A flat string key/value store.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes a value.
    fn set(&self, key: &str, value: &str);

    /// Removes a value.
    fn remove(&self, key: &str);
}

/// In-memory key/value store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

/// Batch persistence of item records.
///
/// Records are stored in their wire form: encrypted envelopes when keys
/// are present, `000` plaintext wrappers otherwise, always with the
/// dirty flag suppressed or explicit.
pub trait ItemPersistence: Send + Sync {
    /// Writes (upserts) a batch of records.
    ///
    /// # Errors
    ///
    /// Returns a persistence error from the backing store.
    fn save_items(&self, items: &[RawItem]) -> ModelResult<()>;

    /// Loads every persisted record, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns a persistence error from the backing store.
    fn load_all(&self) -> ModelResult<Vec<RawItem>>;

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns a persistence error from the backing store.
    fn delete_item(&self, uuid: Uuid) -> ModelResult<()>;

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns a persistence error from the backing store.
    fn clear(&self) -> ModelResult<()>;
}

/// In-memory item persistence.
#[derive(Debug, Default)]
pub struct MemoryItemPersistence {
    records: RwLock<Records>,
}

#[derive(Debug, Default)]
struct Records {
    by_uuid: HashMap<Uuid, RawItem>,
    order: Vec<Uuid>,
}

impl MemoryItemPersistence {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().order.len()
    }

    /// Whether nothing is persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ItemPersistence for MemoryItemPersistence {
    fn save_items(&self, items: &[RawItem]) -> ModelResult<()> {
        let mut records = self.records.write();
        for item in items {
            if records.by_uuid.insert(item.uuid, item.clone()).is_none() {
                records.order.push(item.uuid);
            }
        }
        Ok(())
    }

    fn load_all(&self) -> ModelResult<Vec<RawItem>> {
        let records = self.records.read();
        Ok(records
            .order
            .iter()
            .filter_map(|u| records.by_uuid.get(u))
            .cloned()
            .collect())
    }

    fn delete_item(&self, uuid: Uuid) -> ModelResult<()> {
        let mut records = self.records.write();
        if records.by_uuid.remove(&uuid).is_some() {
            records.order.retain(|u| *u != uuid);
        }
        Ok(())
    }

    fn clear(&self) -> ModelResult<()> {
        let mut records = self.records.write();
        records.by_uuid.clear();
        records.order.clear();
        Ok(())
    }
}

/// Records which migrations have completed.
///
/// The runner's business logic is external; this ledger only persists
/// the set of completed names as a base64 JSON array under the
/// `migrations` key.
pub struct MigrationLedger<'a> {
    kv: &'a dyn KeyValueStore,
}

impl<'a> MigrationLedger<'a> {
    /// Wraps a key/value store.
    #[must_use]
    pub fn new(kv: &'a dyn KeyValueStore) -> Self {
        Self { kv }
    }

    /// Names of completed migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when the persisted ledger is undecodable.
    pub fn completed(&self) -> ModelResult<Vec<String>> {
        let Some(encoded) = self.kv.get(kv_keys::MIGRATIONS) else {
            return Ok(Vec::new());
        };
        let json = base64_decode_string(&encoded)
            .map_err(|e| ModelError::persistence(e.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Whether a migration has run.
    ///
    /// # Errors
    ///
    /// Returns an error when the persisted ledger is undecodable.
    pub fn has_completed(&self, name: &str) -> ModelResult<bool> {
        Ok(self.completed()?.iter().any(|n| n == name))
    }

    /// Records a migration as completed.
    ///
    /// # Errors
    ///
    /// Returns an error when the persisted ledger is undecodable.
    pub fn record(&self, name: &str) -> ModelResult<()> {
        let mut names = self.completed()?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        let json = serde_json::to_string(&names)?;
        self.kv.set(kv_keys::MIGRATIONS, &base64_encode(json.as_bytes()));
        Ok(())
    }
}
