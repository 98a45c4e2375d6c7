//! The item entity.

use chrono::{DateTime, Utc};
use notelock_protocol::{AuthParams, RawItem};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// App-data domain reserved for this client's metadata.
pub const DEFAULT_APP_DOMAIN: &str = "org.notelock.client";

/// App-data key recording the client-side modification time.
pub const CLIENT_UPDATED_AT_KEY: &str = "client_updated_at";

/// A reference from one item to another, carried inside content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReference {
    /// Target item UUID.
    pub uuid: Uuid,
    /// Target content type, when known.
    pub content_type: Option<String>,
}

/// Item content: either a decrypted JSON object or the preserved
/// ciphertext of an item that failed to decrypt.
///
/// Opaque content is first-class: the item stays in the store, syncs its
/// deletion if asked, and is never re-encrypted from garbage.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemContent {
    /// Decrypted application JSON.
    Decrypted(Value),
    /// Ciphertext kept verbatim after a decryption failure.
    Opaque {
        /// The original envelope string.
        raw: String,
    },
}

impl ItemContent {
    /// Empty decrypted content with a references array.
    #[must_use]
    pub fn empty() -> Self {
        Self::Decrypted(json!({ "references": [] }))
    }

    /// The decrypted JSON, if any.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Decrypted(value) => Some(value),
            Self::Opaque { .. } => None,
        }
    }
}

/// The unit of storage and sync.
#[derive(Debug, Clone)]
pub struct Item {
    /// Immutable identity. Changing identity goes through UUID
    /// alternation, which creates a new item.
    pub uuid: Uuid,
    /// Free-form type tag applications dispatch on.
    pub content_type: String,
    /// Content blob.
    pub content: ItemContent,
    /// Wrapped per-item key from the last encrypted form.
    pub enc_item_key: Option<String>,
    /// Legacy top-level auth hash (version `001` records).
    pub auth_hash: Option<String>,
    /// Derivation parameters attached to the last encrypted form.
    pub auth_params: Option<AuthParams>,
    /// Server-set creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Server-set modification time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Deletion marker; deleted items sync once more, then get reaped.
    pub deleted: bool,
    /// UUID of the item this one was duplicated from during conflict
    /// resolution.
    pub conflict_of: Option<Uuid>,
    /// Placeholder marker cleared on first real merge.
    pub dummy: bool,
    /// The content failed authentication or decryption.
    pub error_decrypting: bool,
    /// `error_decrypting` flipped and needs persisting.
    pub error_decrypting_changed: bool,
    dirty: bool,
    dirty_count: u32,
}

impl Item {
    /// Creates a fresh local item with empty content.
    #[must_use]
    pub fn new(uuid: Uuid, content_type: impl Into<String>) -> Self {
        Self {
            uuid,
            content_type: content_type.into(),
            content: ItemContent::empty(),
            enc_item_key: None,
            auth_hash: None,
            auth_params: None,
            created_at: None,
            updated_at: None,
            deleted: false,
            conflict_of: None,
            dummy: false,
            error_decrypting: false,
            error_decrypting_changed: false,
            dirty: false,
            dirty_count: 0,
        }
    }

    /// Builds an item from a wire/disk record and its decoded content.
    #[must_use]
    pub fn from_record(raw: &RawItem, content: ItemContent, error_decrypting: bool) -> Self {
        let mut item = Self::new(raw.uuid, raw.content_type.clone().unwrap_or_default());
        item.content = content;
        item.enc_item_key = raw.enc_item_key.clone();
        item.auth_hash = raw.auth_hash.clone();
        item.auth_params = raw.auth_params.clone();
        item.created_at = raw.created_at;
        item.updated_at = raw.updated_at;
        item.deleted = raw.deleted;
        item.error_decrypting = error_decrypting;
        if let Some(dirty) = raw.dirty {
            if dirty {
                item.dirty = true;
                item.dirty_count = 1;
            }
        }
        item
    }

    /// Merges an incoming record into this item.
    ///
    /// Top-level fields present in the record replace; decrypted content
    /// deep-merges (arrays replace wholesale, so `references` is
    /// authoritative from the input). Client-only state is preserved
    /// unless the record carries it.
    pub fn update_from_record(&mut self, raw: &RawItem, content: Option<ItemContent>) {
        if let Some(content_type) = &raw.content_type {
            self.content_type = content_type.clone();
        }
        if let Some(incoming) = content {
            match (&mut self.content, incoming) {
                (ItemContent::Decrypted(existing), ItemContent::Decrypted(new)) => {
                    deep_merge(existing, &new);
                }
                (slot, incoming) => *slot = incoming,
            }
        }
        if raw.enc_item_key.is_some() {
            self.enc_item_key = raw.enc_item_key.clone();
        }
        if raw.auth_hash.is_some() {
            self.auth_hash = raw.auth_hash.clone();
        }
        if raw.auth_params.is_some() {
            self.auth_params = raw.auth_params.clone();
        }
        if raw.created_at.is_some() {
            self.created_at = raw.created_at;
        }
        if raw.updated_at.is_some() {
            self.updated_at = raw.updated_at;
        }
        self.deleted = raw.deleted;
        if let Some(dirty) = raw.dirty {
            self.dirty = dirty;
            self.dirty_count = u32::from(dirty);
        }
        self.dummy = false;
    }

    /// Whether the item has local changes not yet acknowledged.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of dirtying mutations since the last clear or send.
    #[must_use]
    pub fn dirty_count(&self) -> u32 {
        self.dirty_count
    }

    /// Sets or clears the dirty flag.
    ///
    /// Dirtying stamps `client_updated_at` with `now` unless the caller
    /// opts out (e.g. when replaying state that should not look newer).
    pub fn set_dirty(&mut self, dirty: bool, update_client_date: bool, now: DateTime<Utc>) {
        self.dirty = dirty;
        if dirty {
            self.dirty_count += 1;
            if update_client_date {
                self.set_client_updated_at(now);
            }
        } else {
            self.dirty_count = 0;
        }
    }

    /// Zeroes the dirty count without touching the flag.
    ///
    /// Called on the submission snapshot at send time; a mutation during
    /// the in-flight window bumps the count again, which is what blocks
    /// the clear when the response lands.
    pub fn reset_dirty_count(&mut self) {
        self.dirty_count = 0;
    }

    /// Whether this item rides the next sync cycle.
    #[must_use]
    pub fn qualifies_for_sync(&self) -> bool {
        self.dirty && !self.dummy && (!self.error_decrypting || self.deleted)
    }

    /// Reads an app-data value.
    #[must_use]
    pub fn app_data(&self, domain: &str, key: &str) -> Option<Value> {
        self.content
            .as_value()?
            .get("appData")?
            .get(domain)?
            .get(key)
            .cloned()
    }

    /// Writes an app-data value. No-op on opaque content.
    pub fn set_app_data(&mut self, domain: &str, key: &str, value: Value) {
        let ItemContent::Decrypted(content) = &mut self.content else {
            return;
        };
        let root = ensure_object(content);
        let app_data = ensure_object(
            root.entry("appData".to_string())
                .or_insert_with(|| Value::Object(Map::new())),
        );
        let domain_map = ensure_object(
            app_data
                .entry(domain.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
        );
        domain_map.insert(key.to_string(), value);
    }

    /// The client-side modification time, if recorded.
    #[must_use]
    pub fn client_updated_at(&self) -> Option<DateTime<Utc>> {
        let value = self.app_data(DEFAULT_APP_DOMAIN, CLIENT_UPDATED_AT_KEY)?;
        value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Records the client-side modification time.
    pub fn set_client_updated_at(&mut self, when: DateTime<Utc>) {
        self.set_app_data(
            DEFAULT_APP_DOMAIN,
            CLIENT_UPDATED_AT_KEY,
            Value::String(when.to_rfc3339()),
        );
    }

    /// Forward references carried in content.
    #[must_use]
    pub fn references(&self) -> Vec<ItemReference> {
        let Some(content) = self.content.as_value() else {
            return Vec::new();
        };
        let Some(refs) = content.get("references").and_then(Value::as_array) else {
            return Vec::new();
        };
        refs.iter()
            .filter_map(|entry| {
                let uuid = entry.get("uuid")?.as_str()?;
                let uuid = Uuid::parse_str(uuid).ok()?;
                let content_type = entry
                    .get("content_type")
                    .and_then(Value::as_str)
                    .map(String::from);
                Some(ItemReference { uuid, content_type })
            })
            .collect()
    }

    /// Adds a forward reference if not already present.
    pub fn add_reference(&mut self, reference: ItemReference) {
        if self.has_reference(reference.uuid) {
            return;
        }
        let ItemContent::Decrypted(content) = &mut self.content else {
            return;
        };
        let root = ensure_object(content);
        let refs = root
            .entry("references".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(entries) = refs {
            let mut entry = Map::new();
            entry.insert(
                "uuid".to_string(),
                Value::String(reference.uuid.to_string()),
            );
            if let Some(content_type) = reference.content_type {
                entry.insert("content_type".to_string(), Value::String(content_type));
            }
            entries.push(Value::Object(entry));
        }
    }

    /// Removes a forward reference.
    pub fn remove_reference(&mut self, target: Uuid) {
        let ItemContent::Decrypted(content) = &mut self.content else {
            return;
        };
        let Some(refs) = content.get_mut("references").and_then(Value::as_array_mut) else {
            return;
        };
        refs.retain(|entry| {
            entry
                .get("uuid")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                != Some(target)
        });
    }

    /// Drops every forward reference.
    pub fn clear_references(&mut self) {
        if let ItemContent::Decrypted(content) = &mut self.content {
            let root = ensure_object(content);
            root.insert("references".to_string(), Value::Array(Vec::new()));
        }
    }

    /// Whether this item references `target`.
    #[must_use]
    pub fn has_reference(&self, target: Uuid) -> bool {
        self.references().iter().any(|r| r.uuid == target)
    }

    /// Compares content with another item, ignoring volatile keys.
    ///
    /// `client_updated_at` under the default app-data domain is always
    /// ignored; callers add subclass-specific volatile keys via
    /// `ignoring`. Opaque contents compare by their raw strings.
    #[must_use]
    pub fn content_equals(&self, other: &Item, ignoring: &[&str]) -> bool {
        match (&self.content, &other.content) {
            (ItemContent::Decrypted(a), ItemContent::Decrypted(b)) => {
                comparable_content(a, ignoring) == comparable_content(b, ignoring)
            }
            (ItemContent::Opaque { raw: a }, ItemContent::Opaque { raw: b }) => a == b,
            _ => false,
        }
    }
}

/// Recursively merges `source` into `target`.
///
/// Objects merge key by key; arrays and scalars replace. Array
/// replacement is what keeps a record's `references` authoritative.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target_slot, source_value) => {
            *target_slot = source_value.clone();
        }
    }
}

fn comparable_content(content: &Value, ignoring: &[&str]) -> Value {
    let mut copy = content.clone();
    if let Value::Object(map) = &mut copy {
        for key in ignoring {
            map.remove(*key);
        }
        let mut drop_app_data = false;
        if let Some(Value::Object(app_data)) = map.get_mut("appData") {
            let mut drop_domain = false;
            if let Some(Value::Object(domain)) = app_data.get_mut(DEFAULT_APP_DOMAIN) {
                domain.remove(CLIENT_UPDATED_AT_KEY);
                drop_domain = domain.is_empty();
            }
            if drop_domain {
                app_data.remove(DEFAULT_APP_DOMAIN);
            }
            drop_app_data = app_data.is_empty();
        }
        if drop_app_data {
            map.remove("appData");
        }
        // An absent references array and an empty one read the same.
        if map.get("references").and_then(Value::as_array).is_some_and(Vec::is_empty) {
            map.remove("references");
        }
    }
    copy
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut().expect("just ensured object")
}
