//! The in-memory item store and mapper.
//!
//! The store is the exclusive owner of all items. Other components refer
//! to items by UUID and mutate them through the store API, which keeps
//! the reference graph invariants:
//!
//! - `content.references` is authoritative for forward edges.
//! - For every reference `A -> B`, once `B` is present the store records
//!   `A` in `B`'s back-reference set.
//! - A reference whose target has not arrived yet sits in the
//!   missed-references table, keyed `(target, from)` to coalesce
//!   duplicates, and is finalized the moment the target maps.

use crate::clock::Clock;
use crate::error::{ModelError, ModelResult};
use crate::item::{Item, ItemContent, ItemReference};
use crate::scheduler::Scheduler;
use notelock_crypto::CryptoProvider;
use notelock_protocol::RawItem;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Where a batch of records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSource {
    /// Items the server reported as changed.
    RemoteRetrieved,
    /// Metadata echoes for items we pushed.
    RemoteSaved,
    /// Local mutations being re-mapped (deletions, alternation).
    LocalSaved,
    /// Items loaded from local persistence.
    LocalRetrieved,
    /// Records handed over by an embedded component.
    ComponentRetrieved,
    /// Records installed by the desktop shell.
    DesktopInstalled,
    /// Records fetched by a one-off remote action.
    RemoteActionRetrieved,
    /// Records imported from a file archive.
    FileImport,
}

/// A record entering the mapper, with its decoded content.
///
/// Decryption happens before mapping; a record that failed carries
/// `error_decrypting` and its untouched envelope string in `raw.content`.
#[derive(Debug, Clone)]
pub struct IncomingRecord {
    /// The wire/disk record.
    pub raw: RawItem,
    /// Decoded content, when decryption succeeded.
    pub content: Option<ItemContent>,
    /// The record failed authentication or decryption.
    pub error_decrypting: bool,
}

impl IncomingRecord {
    /// A record with decrypted JSON content.
    #[must_use]
    pub fn decrypted(raw: RawItem, content: Value) -> Self {
        Self {
            raw,
            content: Some(ItemContent::Decrypted(content)),
            error_decrypting: false,
        }
    }

    /// A record whose content could not be decrypted.
    #[must_use]
    pub fn opaque(raw: RawItem) -> Self {
        let preserved = raw.content.clone().unwrap_or_default();
        Self {
            raw,
            content: Some(ItemContent::Opaque { raw: preserved }),
            error_decrypting: true,
        }
    }

    /// A record with no content payload (metadata echo or deletion).
    #[must_use]
    pub fn bare(raw: RawItem) -> Self {
        Self {
            raw,
            content: None,
            error_decrypting: false,
        }
    }
}

type ItemObserver = Box<dyn Fn(&[Item], MappingSource) + Send + Sync>;
type UuidChangeObserver = Box<dyn Fn(&Item, &Item) + Send + Sync>;

struct ObserverEntry {
    content_types: Option<HashSet<String>>,
    callback: ItemObserver,
}

#[derive(Default)]
struct StoreInner {
    items: HashMap<Uuid, Item>,
    insertion_order: Vec<Uuid>,
    back_references: HashMap<Uuid, HashSet<Uuid>>,
    missed_references: HashMap<Uuid, HashSet<Uuid>>,
    pending_removal: HashSet<Uuid>,
    allowed_types: Option<HashSet<String>>,
}

impl StoreInner {
    fn insert(&mut self, item: Item) {
        let uuid = item.uuid;
        if self.items.insert(uuid, item).is_none() {
            self.insertion_order.push(uuid);
        }
    }

    fn remove(&mut self, uuid: Uuid) -> Option<Item> {
        let item = self.items.remove(&uuid)?;
        self.insertion_order.retain(|u| *u != uuid);
        self.back_references.remove(&uuid);
        for set in self.back_references.values_mut() {
            set.remove(&uuid);
        }
        Some(item)
    }

    fn install_back_reference(&mut self, target: Uuid, from: Uuid) {
        self.back_references.entry(target).or_default().insert(from);
    }

    fn drop_back_reference(&mut self, target: Uuid, from: Uuid) {
        let now_empty = match self.back_references.get_mut(&target) {
            Some(set) => {
                set.remove(&from);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.back_references.remove(&target);
        }
    }

    /// Reconciles back-edges after an item's forward references changed.
    fn reconcile_references(&mut self, uuid: Uuid, before: &[ItemReference]) {
        let after: HashSet<Uuid> = self
            .items
            .get(&uuid)
            .map(|item| item.references().iter().map(|r| r.uuid).collect())
            .unwrap_or_default();
        for old in before {
            if !after.contains(&old.uuid) {
                self.drop_back_reference(old.uuid, uuid);
            }
        }
        for target in &after {
            if self.items.contains_key(target) {
                self.install_back_reference(*target, uuid);
            } else {
                self.missed_references.entry(*target).or_default().insert(uuid);
            }
        }
    }
}

/// The in-memory index of items, keyed by UUID.
pub struct ItemStore {
    inner: RwLock<StoreInner>,
    observers: Arc<RwLock<Vec<ObserverEntry>>>,
    uuid_observers: RwLock<Vec<UuidChangeObserver>>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    provider: Arc<dyn CryptoProvider>,
}

impl ItemStore {
    /// Creates an empty store.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn CryptoProvider>,
    ) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            observers: Arc::new(RwLock::new(Vec::new())),
            uuid_observers: RwLock::new(Vec::new()),
            scheduler,
            clock,
            provider,
        }
    }

    /// Restricts mapping to the given content types. `None` lifts the
    /// restriction.
    pub fn set_content_type_allow_list(&self, types: Option<Vec<String>>) {
        self.inner.write().allowed_types = types.map(|t| t.into_iter().collect());
    }

    /// Creates a fresh dirty item and returns its UUID.
    pub fn create_item(&self, content_type: impl Into<String>, content: Value) -> Uuid {
        let uuid = self.provider.generate_uuid();
        let mut item = Item::new(uuid, content_type);
        item.content = ItemContent::Decrypted(content);
        item.set_dirty(true, true, self.clock.now());
        let before = Vec::new();
        {
            let mut inner = self.inner.write();
            inner.insert(item);
            inner.reconcile_references(uuid, &before);
        }
        uuid
    }

    /// Inserts a fully-formed item (conflict duplicates, imports).
    pub fn insert_item(&self, item: Item) {
        let uuid = item.uuid;
        let mut inner = self.inner.write();
        inner.insert(item);
        inner.reconcile_references(uuid, &[]);
    }

    /// Returns a snapshot of the item, if present.
    #[must_use]
    pub fn get(&self, uuid: Uuid) -> Option<Item> {
        self.inner.read().items.get(&uuid).cloned()
    }

    /// Non-deleted, non-dummy items in insertion order.
    #[must_use]
    pub fn all_items(&self) -> Vec<Item> {
        let inner = self.inner.read();
        inner
            .insertion_order
            .iter()
            .filter_map(|u| inner.items.get(u))
            .filter(|item| !item.deleted && !item.dummy)
            .cloned()
            .collect()
    }

    /// Items satisfying every predicate (non-deleted).
    #[must_use]
    pub fn items_matching(&self, predicates: &[crate::predicate::Predicate]) -> Vec<Item> {
        let now = self.clock.now();
        self.all_items()
            .into_iter()
            .filter(|item| predicates.iter().all(|p| p.evaluate(item, now)))
            .collect()
    }

    /// Every dirty item, including deleted ones awaiting their ack.
    #[must_use]
    pub fn dirty_items(&self) -> Vec<Item> {
        let inner = self.inner.read();
        inner
            .insertion_order
            .iter()
            .filter_map(|u| inner.items.get(u))
            .filter(|item| item.is_dirty())
            .cloned()
            .collect()
    }

    /// Dirty items eligible for the next sync cycle.
    #[must_use]
    pub fn sync_eligible_items(&self) -> Vec<Item> {
        let inner = self.inner.read();
        inner
            .insertion_order
            .iter()
            .filter_map(|u| inner.items.get(u))
            .filter(|item| item.qualifies_for_sync())
            .cloned()
            .collect()
    }

    /// UUIDs of items currently referencing `uuid`.
    #[must_use]
    pub fn referencing_items(&self, uuid: Uuid) -> Vec<Uuid> {
        self.inner
            .read()
            .back_references
            .get(&uuid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether the missed-references table holds `(target, from)`.
    #[must_use]
    pub fn has_missed_reference(&self, target: Uuid, from: Uuid) -> bool {
        self.inner
            .read()
            .missed_references
            .get(&target)
            .is_some_and(|set| set.contains(&from))
    }

    /// Number of distinct unresolved reference targets.
    #[must_use]
    pub fn missed_reference_count(&self) -> usize {
        self.inner.read().missed_references.len()
    }

    /// Sets or clears an item's dirty flag.
    ///
    /// # Errors
    ///
    /// Returns `ItemNotFound` when absent.
    pub fn set_item_dirty(&self, uuid: Uuid, dirty: bool, update_client_date: bool) -> ModelResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let item = inner.items.get_mut(&uuid).ok_or(ModelError::not_found(uuid))?;
        item.set_dirty(dirty, update_client_date, now);
        Ok(())
    }

    /// Mutates an item in place and reconciles its back-edges.
    ///
    /// # Errors
    ///
    /// Returns `ItemNotFound` when absent.
    pub fn modify_item<F>(&self, uuid: Uuid, f: F) -> ModelResult<()>
    where
        F: FnOnce(&mut Item),
    {
        let mut inner = self.inner.write();
        let item = inner.items.get_mut(&uuid).ok_or(ModelError::not_found(uuid))?;
        let before = item.references();
        f(item);
        inner.reconcile_references(uuid, &before);
        Ok(())
    }

    /// Installs the relationship `from -> to` in both directions.
    ///
    /// # Errors
    ///
    /// Returns `ItemNotFound` when either side is absent.
    pub fn add_relationship(&self, from: Uuid, to: Uuid) -> ModelResult<()> {
        let mut inner = self.inner.write();
        let target_type = inner
            .items
            .get(&to)
            .ok_or(ModelError::not_found(to))?
            .content_type
            .clone();
        let item = inner.items.get_mut(&from).ok_or(ModelError::not_found(from))?;
        item.add_reference(ItemReference {
            uuid: to,
            content_type: Some(target_type),
        });
        inner.install_back_reference(to, from);
        Ok(())
    }

    /// Removes the relationship `from -> to` in both directions.
    ///
    /// # Errors
    ///
    /// Returns `ItemNotFound` when `from` is absent.
    pub fn remove_relationship(&self, from: Uuid, to: Uuid) -> ModelResult<()> {
        let mut inner = self.inner.write();
        let item = inner.items.get_mut(&from).ok_or(ModelError::not_found(from))?;
        item.remove_reference(to);
        inner.drop_back_reference(to, from);
        Ok(())
    }

    /// Registers an observer for mapped batches, optionally filtered by
    /// content type.
    pub fn register_observer<F>(&self, content_types: Option<Vec<String>>, callback: F)
    where
        F: Fn(&[Item], MappingSource) + Send + Sync + 'static,
    {
        self.observers.write().push(ObserverEntry {
            content_types: content_types.map(|t| t.into_iter().collect()),
            callback: Box::new(callback),
        });
    }

    /// Registers an observer for UUID alternation, called with the old
    /// and the new item.
    pub fn register_uuid_change_observer<F>(&self, callback: F)
    where
        F: Fn(&Item, &Item) + Send + Sync + 'static,
    {
        self.uuid_observers.write().push(Box::new(callback));
    }

    /// Marks a UUID so a late server echo cannot resurrect it.
    pub fn mark_pending_removal(&self, uuid: Uuid) {
        self.inner.write().pending_removal.insert(uuid);
    }

    /// Removes an item locally and shields its UUID from late echoes.
    pub fn remove_item_locally(&self, uuid: Uuid) -> Option<Item> {
        let mut inner = self.inner.write();
        let removed = inner.remove(uuid);
        if removed.is_some() {
            inner.pending_removal.insert(uuid);
        }
        removed
    }

    /// Zeroes the dirty count of the given items (the send-time
    /// snapshot). The dirty flag itself is untouched.
    pub fn reset_dirty_counts(&self, uuids: &[Uuid]) {
        let mut inner = self.inner.write();
        for uuid in uuids {
            if let Some(item) = inner.items.get_mut(uuid) {
                item.reset_dirty_count();
            }
        }
    }

    /// Clears the dirty flag on items whose dirty count is still zero,
    /// i.e. nothing re-dirtied them since the send-time snapshot.
    pub fn clear_dirty_if_unchanged(&self, uuids: &[Uuid]) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        for uuid in uuids {
            if let Some(item) = inner.items.get_mut(uuid) {
                if item.dirty_count() == 0 {
                    item.set_dirty(false, false, now);
                }
            }
        }
    }

    /// Stamps `updated_at` on the given items (offline save path).
    pub fn stamp_updated_at(&self, uuids: &[Uuid], when: chrono::DateTime<chrono::Utc>) {
        let mut inner = self.inner.write();
        for uuid in uuids {
            if let Some(item) = inner.items.get_mut(uuid) {
                item.updated_at = Some(when);
            }
        }
    }

    /// Maps a batch of incoming records into local state.
    ///
    /// Two passes: the first merges or creates items per record, the
    /// second resolves references and settles the missed-references
    /// table. Observer fan-out happens once, after both passes, through
    /// the scheduler, so observers see a coherent batch.
    ///
    /// Returns the mapped items (deletions included, as their final
    /// snapshots).
    pub fn map_records(
        &self,
        records: Vec<IncomingRecord>,
        source: MappingSource,
        omit_fields: &[&str],
    ) -> Vec<Item> {
        let mut notify: Vec<Item> = Vec::new();
        let mut mapped_uuids: Vec<Uuid> = Vec::new();
        let mut content_uuids: Vec<(Uuid, Vec<ItemReference>)> = Vec::new();

        {
            let mut inner = self.inner.write();
            for mut record in records {
                let uuid = record.raw.uuid;

                // Records with nothing to map are skipped outright,
                // judged before any fields are omitted.
                if record.raw.is_bare()
                    && record.content.is_none()
                    && !record.raw.deleted
                    && !record.error_decrypting
                {
                    continue;
                }
                apply_omit_fields(&mut record, omit_fields);

                // Merge into an existing item first; the drops below
                // stop processing a record, they never un-merge.
                let mut previous_references = Vec::new();
                let mut existing_present = false;
                if let Some(existing) = inner.items.get_mut(&uuid) {
                    existing_present = true;
                    previous_references = existing.references();
                    existing.update_from_record(&record.raw, record.content.clone());
                    reconcile_error_decrypting(existing, &record);
                }

                // A UUID we recently removed must not come back on a
                // late echo.
                if inner.pending_removal.remove(&uuid) {
                    debug!(%uuid, "dropping record for uuid pending removal");
                    continue;
                }

                if let (Some(allowed), Some(content_type)) =
                    (&inner.allowed_types, &record.raw.content_type)
                {
                    if !allowed.contains(content_type) {
                        continue;
                    }
                }

                if record.raw.deleted {
                    let Some(snapshot) = inner.items.get(&uuid).cloned() else {
                        // Nothing local to delete.
                        continue;
                    };
                    if snapshot.is_dirty() {
                        // Keeps riding the dirty set; collection views
                        // already exclude deleted items. Reaped once the
                        // server acks.
                        notify.push(snapshot);
                    } else {
                        let removed = inner.remove(uuid).expect("present");
                        notify.push(removed);
                    }
                    continue;
                }

                if !existing_present {
                    let content = record
                        .content
                        .clone()
                        .unwrap_or_else(ItemContent::empty);
                    let item = Item::from_record(&record.raw, content, record.error_decrypting);
                    inner.insert(item);
                }

                let snapshot = inner
                    .items
                    .get(&uuid)
                    .cloned()
                    .expect("just inserted or merged");
                if record.content.is_some() && !snapshot.error_decrypting {
                    content_uuids.push((uuid, previous_references));
                }
                mapped_uuids.push(uuid);
                if !snapshot.error_decrypting {
                    notify.push(snapshot);
                }
            }

            // Pass 2: forward edges resolve into back edges; unresolved
            // targets enter the missed-references table.
            for (uuid, before) in &content_uuids {
                inner.reconcile_references(*uuid, before);
            }
            for uuid in &mapped_uuids {
                if let Some(froms) = inner.missed_references.remove(uuid) {
                    for from in froms {
                        let still_references = inner
                            .items
                            .get(&from)
                            .is_some_and(|item| item.has_reference(*uuid));
                        if still_references {
                            inner.install_back_reference(*uuid, from);
                        }
                    }
                }
            }
        }

        debug!(
            source = ?source,
            mapped = mapped_uuids.len(),
            notified = notify.len(),
            "mapped record batch"
        );
        self.notify_observers(notify.clone(), source);
        notify
    }

    /// Re-issues a fresh UUID for an item whose identity collides with a
    /// distinct server item.
    ///
    /// The original is dropped (deleted, not dirty: the obsolete UUID is
    /// never pushed) and every referencing item is rewired to the new
    /// UUID and dirtied. Returns the new UUID.
    ///
    /// # Errors
    ///
    /// Returns `ItemNotFound` when absent.
    pub fn alternate_uuid(&self, uuid: Uuid) -> ModelResult<Uuid> {
        let original = self.get(uuid).ok_or(ModelError::not_found(uuid))?;
        let new_uuid = self.provider.generate_uuid();
        debug!(%uuid, %new_uuid, "re-issuing uuid");

        let mut duplicate = original.clone();
        duplicate.uuid = new_uuid;
        // Envelopes embed the old uuid; the next push re-encrypts.
        duplicate.enc_item_key = None;
        duplicate.auth_hash = None;
        duplicate.set_dirty(false, false, self.clock.now());
        self.insert_item(duplicate.clone());

        for observer in self.uuid_observers.read().iter() {
            observer(&original, &duplicate);
        }

        for referencer in self.referencing_items(uuid) {
            if referencer == new_uuid {
                continue;
            }
            self.remove_relationship(referencer, uuid)?;
            self.add_relationship(referencer, new_uuid)?;
            self.set_item_dirty(referencer, true, true)?;
        }

        // The original never reaches the server again: cleared, deleted,
        // and explicitly not dirty.
        let now = self.clock.now();
        self.modify_item(uuid, |item| {
            item.clear_references();
            item.deleted = true;
            item.set_dirty(false, false, now);
        })?;

        let mut tombstone = RawItem::new(uuid);
        tombstone.content_type = Some(original.content_type.clone());
        tombstone.deleted = true;
        self.map_records(
            vec![IncomingRecord::bare(tombstone)],
            MappingSource::LocalSaved,
            &[],
        );
        self.mark_pending_removal(uuid);

        self.set_item_dirty(new_uuid, true, true)?;
        Ok(new_uuid)
    }

    fn notify_observers(&self, batch: Vec<Item>, source: MappingSource) {
        if batch.is_empty() {
            return;
        }
        let observers = Arc::clone(&self.observers);
        self.scheduler.schedule(Box::new(move || {
            for entry in observers.read().iter() {
                let filtered: Vec<Item> = match &entry.content_types {
                    Some(types) => batch
                        .iter()
                        .filter(|item| types.contains(&item.content_type))
                        .cloned()
                        .collect(),
                    None => batch.clone(),
                };
                if !filtered.is_empty() {
                    (entry.callback)(&filtered, source);
                }
            }
        }));
    }
}

fn apply_omit_fields(record: &mut IncomingRecord, omit_fields: &[&str]) {
    for field in omit_fields {
        match *field {
            "content" => {
                record.raw.content = None;
                record.content = None;
            }
            "auth_hash" => record.raw.auth_hash = None,
            "enc_item_key" => record.raw.enc_item_key = None,
            "auth_params" => record.raw.auth_params = None,
            _ => {}
        }
    }
}

fn reconcile_error_decrypting(item: &mut Item, record: &IncomingRecord) {
    if !record.error_decrypting && record.content.is_none() {
        // The record made no statement about content; leave the flag.
        return;
    }
    if record.error_decrypting != item.error_decrypting {
        item.error_decrypting_changed = true;
    }
    item.error_decrypting = record.error_decrypting;
    if record.error_decrypting {
        item.content = ItemContent::Opaque {
            raw: record.raw.content.clone().unwrap_or_default(),
        };
    }
}

impl std::fmt::Debug for ItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ItemStore")
            .field("items", &inner.items.len())
            .field("missed_references", &inner.missed_references.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::scheduler::ImmediateScheduler;
    use notelock_crypto::OsCryptoProvider;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> ItemStore {
        ItemStore::new(
            Arc::new(ImmediateScheduler),
            Arc::new(SystemClock),
            Arc::new(OsCryptoProvider),
        )
    }

    fn record(uuid: Uuid, content_type: &str, content: Value) -> IncomingRecord {
        let mut raw = RawItem::new(uuid);
        raw.content_type = Some(content_type.into());
        IncomingRecord::decrypted(raw, content)
    }

    #[test]
    fn map_creates_and_merges() {
        let store = store();
        let uuid = Uuid::new_v4();

        store.map_records(
            vec![record(uuid, "Note", json!({"text": "v1"}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert_eq!(store.all_items().len(), 1);

        store.map_records(
            vec![record(uuid, "Note", json!({"text": "v2", "extra": 1}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        let item = store.get(uuid).unwrap();
        let content = item.content.as_value().unwrap();
        assert_eq!(content["text"], "v2");
        assert_eq!(content["extra"], 1);
        assert_eq!(store.all_items().len(), 1);
    }

    #[test]
    fn bare_records_are_skipped() {
        let store = store();
        store.map_records(
            vec![IncomingRecord::bare(RawItem::new(Uuid::new_v4()))],
            MappingSource::RemoteSaved,
            &[],
        );
        assert!(store.all_items().is_empty());
    }

    #[test]
    fn omit_fields_protect_cached_content() {
        let store = store();
        let uuid = Uuid::new_v4();
        store.map_records(
            vec![record(uuid, "Note", json!({"text": "local"}))],
            MappingSource::RemoteRetrieved,
            &[],
        );

        // A saved echo carrying content must not clobber it when the
        // caller omits content.
        let mut echo = RawItem::new(uuid);
        echo.content_type = Some("Note".into());
        let echo_record = IncomingRecord::decrypted(echo, json!({"text": "SERVER"}));
        store.map_records(
            vec![echo_record],
            MappingSource::RemoteSaved,
            &["content", "auth_hash"],
        );

        let item = store.get(uuid).unwrap();
        assert_eq!(item.content.as_value().unwrap()["text"], "local");
    }

    #[test]
    fn idempotent_saved_mapping() {
        let store = store();
        let uuid = Uuid::new_v4();
        store.map_records(
            vec![record(uuid, "Note", json!({"text": "body"}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        let before = store.get(uuid).unwrap();

        let mut echo = RawItem::new(uuid);
        echo.content_type = Some("Note".into());
        for _ in 0..2 {
            store.map_records(
                vec![IncomingRecord::bare(echo.clone())],
                MappingSource::RemoteSaved,
                &["content", "auth_hash"],
            );
        }
        let after = store.get(uuid).unwrap();
        assert!(before.content_equals(&after, &[]));
    }

    #[test]
    fn deleted_not_dirty_removes() {
        let store = store();
        let uuid = Uuid::new_v4();
        store.map_records(
            vec![record(uuid, "Note", json!({}))],
            MappingSource::RemoteRetrieved,
            &[],
        );

        let mut tombstone = RawItem::new(uuid);
        tombstone.content_type = Some("Note".into());
        tombstone.deleted = true;
        let batch = store.map_records(
            vec![IncomingRecord::bare(tombstone)],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert!(store.get(uuid).is_none());
        assert!(batch.iter().any(|i| i.uuid == uuid && i.deleted));
    }

    #[test]
    fn deleted_dirty_is_kept_but_hidden() {
        let store = store();
        let uuid = store.create_item("Note", json!({}));
        store
            .modify_item(uuid, |item| item.deleted = true)
            .unwrap();

        // Still present (awaiting its ack) but out of collection views.
        assert!(store.get(uuid).is_some());
        assert!(store.all_items().is_empty());
        assert_eq!(store.dirty_items().len(), 1);
    }

    #[test]
    fn pending_removal_blocks_late_echo() {
        let store = store();
        let uuid = Uuid::new_v4();
        store.map_records(
            vec![record(uuid, "Note", json!({}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        store.remove_item_locally(uuid);

        // First echo is swallowed and un-lists the uuid.
        store.map_records(
            vec![record(uuid, "Note", json!({}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert!(store.get(uuid).is_none());

        // A later, genuine re-map goes through.
        store.map_records(
            vec![record(uuid, "Note", json!({}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert!(store.get(uuid).is_some());
    }

    #[test]
    fn allow_list_filters_types() {
        let store = store();
        store.set_content_type_allow_list(Some(vec!["Note".into()]));

        store.map_records(
            vec![
                record(Uuid::new_v4(), "Note", json!({})),
                record(Uuid::new_v4(), "Tag", json!({})),
            ],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert_eq!(store.all_items().len(), 1);
        assert_eq!(store.all_items()[0].content_type, "Note");
    }

    #[test]
    fn references_resolve_in_batch() {
        let store = store();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store.map_records(
            vec![
                record(a, "Note", json!({"references": [{"uuid": b.to_string()}]})),
                record(b, "Tag", json!({})),
            ],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert_eq!(store.referencing_items(b), vec![a]);
        assert_eq!(store.missed_reference_count(), 0);
    }

    #[test]
    fn deferred_reference_resolution() {
        let store = store();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store.map_records(
            vec![record(a, "Note", json!({"references": [{"uuid": b.to_string()}]}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert!(store.has_missed_reference(b, a));

        store.map_records(
            vec![record(b, "Tag", json!({}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert_eq!(store.referencing_items(b), vec![a]);
        assert_eq!(store.missed_reference_count(), 0);
    }

    #[test]
    fn missed_references_coalesce() {
        let store = store();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let reference = json!({"references": [{"uuid": b.to_string()}]});

        // Mapping the same referencing record repeatedly keeps a single
        // missed entry.
        for _ in 0..3 {
            store.map_records(
                vec![record(a, "Note", reference.clone())],
                MappingSource::RemoteRetrieved,
                &[],
            );
        }
        assert_eq!(store.missed_reference_count(), 1);
        assert!(store.has_missed_reference(b, a));
    }

    #[test]
    fn relationship_api_keeps_back_edges() {
        let store = store();
        let from = store.create_item("Note", json!({}));
        let to = store.create_item("Tag", json!({}));

        store.add_relationship(from, to).unwrap();
        assert!(store.get(from).unwrap().has_reference(to));
        assert_eq!(store.referencing_items(to), vec![from]);

        store.remove_relationship(from, to).unwrap();
        assert!(!store.get(from).unwrap().has_reference(to));
        assert!(store.referencing_items(to).is_empty());
    }

    #[test]
    fn remap_drops_stale_back_edges() {
        let store = store();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        store.map_records(
            vec![
                record(a, "Note", json!({"references": [{"uuid": b.to_string()}]})),
                record(b, "Tag", json!({})),
                record(c, "Tag", json!({})),
            ],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert_eq!(store.referencing_items(b), vec![a]);

        // The server now says a references c instead of b.
        store.map_records(
            vec![record(a, "Note", json!({"references": [{"uuid": c.to_string()}]}))],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert!(store.referencing_items(b).is_empty());
        assert_eq!(store.referencing_items(c), vec![a]);
    }

    #[test]
    fn observers_get_batches_filtered_by_type() {
        let store = store();
        let notes = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let notes_count = Arc::clone(&notes);
        store.register_observer(Some(vec!["Note".into()]), move |items, _source| {
            notes_count.fetch_add(items.len(), Ordering::SeqCst);
        });
        let all_count = Arc::clone(&all);
        store.register_observer(None, move |items, _source| {
            all_count.fetch_add(items.len(), Ordering::SeqCst);
        });

        store.map_records(
            vec![
                record(Uuid::new_v4(), "Note", json!({})),
                record(Uuid::new_v4(), "Tag", json!({})),
            ],
            MappingSource::RemoteRetrieved,
            &[],
        );
        assert_eq!(notes.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn error_decrypting_excluded_from_observers() {
        let store = store();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        store.register_observer(None, move |items, _| {
            counter.fetch_add(items.len(), Ordering::SeqCst);
        });

        let mut raw = RawItem::new(Uuid::new_v4());
        raw.content_type = Some("Note".into());
        raw.content = Some("003:bad:junk".into());
        store.map_records(
            vec![IncomingRecord::opaque(raw.clone())],
            MappingSource::RemoteRetrieved,
            &[],
        );

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        let item = store.get(raw.uuid).unwrap();
        assert!(item.error_decrypting);
        assert!(matches!(item.content, ItemContent::Opaque { .. }));
    }

    #[test]
    fn error_decrypting_flag_change_is_tracked() {
        let store = store();
        let uuid = Uuid::new_v4();
        store.map_records(
            vec![record(uuid, "Note", json!({"text": "fine"}))],
            MappingSource::RemoteRetrieved,
            &[],
        );

        let mut raw = RawItem::new(uuid);
        raw.content_type = Some("Note".into());
        raw.content = Some("003:tampered".into());
        store.map_records(
            vec![IncomingRecord::opaque(raw)],
            MappingSource::RemoteRetrieved,
            &[],
        );
        let item = store.get(uuid).unwrap();
        assert!(item.error_decrypting);
        assert!(item.error_decrypting_changed);
    }

    #[test]
    fn alternate_uuid_rewires_graph() {
        let store = store();
        let x = store.create_item("Note", json!({"text": "x"}));
        let r = store.create_item("Tag", json!({}));
        store.add_relationship(r, x).unwrap();
        store.reset_dirty_counts(&[x, r]);
        store.clear_dirty_if_unchanged(&[x, r]);

        let observed = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&observed);
        store.register_uuid_change_observer(move |old, new| {
            *slot.lock() = Some((old.uuid, new.uuid));
        });

        let x2 = store.alternate_uuid(x).unwrap();

        // Original gone; duplicate carries the content and is dirty.
        assert!(store.get(x).is_none());
        let duplicate = store.get(x2).unwrap();
        assert!(duplicate.is_dirty());
        assert_eq!(duplicate.content.as_value().unwrap()["text"], "x");

        // Referencer rewired and dirtied.
        let referencer = store.get(r).unwrap();
        assert!(referencer.has_reference(x2));
        assert!(!referencer.has_reference(x));
        assert!(referencer.is_dirty());
        assert_eq!(store.referencing_items(x2), vec![r]);

        assert_eq!(*observed.lock(), Some((x, x2)));
    }

    #[test]
    fn dirty_count_guard() {
        let store = store();
        let uuid = store.create_item("Note", json!({}));

        // Send-time snapshot.
        store.reset_dirty_counts(&[uuid]);
        assert!(store.get(uuid).unwrap().is_dirty());

        // Re-dirtied mid-flight: the clear must not stick.
        store.set_item_dirty(uuid, true, true).unwrap();
        store.clear_dirty_if_unchanged(&[uuid]);
        assert!(store.get(uuid).unwrap().is_dirty());

        // Quiet flight: clears.
        store.reset_dirty_counts(&[uuid]);
        store.clear_dirty_if_unchanged(&[uuid]);
        assert!(!store.get(uuid).unwrap().is_dirty());
    }
}
