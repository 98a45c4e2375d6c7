//! Conflict resolution for the server's `unsaved` array.

use crate::engine::{AccountSession, SyncEngine};
use crate::error::SyncResult;
use notelock_model::{IncomingRecord, Item, ItemContent, MappingSource};
use notelock_protocol::{decrypt_item_content, ConflictTag, UnsavedItem};
use tracing::{debug, warn};

/// What conflict processing decided about the rest of the cycle.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConflictOutcome {
    /// An extra cycle must run, pushing `created_at`/`updated_at` so
    /// duplicates keep their original timestamps.
    pub needs_additional_sync: bool,
}

impl SyncEngine {
    /// Resolves every entry the server refused.
    ///
    /// `uuid_conflict` means our UUID collides with a distinct server
    /// item: the local item is re-issued a fresh UUID. `sync_conflict`
    /// means the server copy is newer: its content becomes a duplicate
    /// item when it actually differs from ours.
    pub(crate) fn process_unsaved(
        &self,
        unsaved: &[UnsavedItem],
        session: &AccountSession,
    ) -> SyncResult<ConflictOutcome> {
        for entry in unsaved {
            match entry.error.tag {
                ConflictTag::UuidConflict => self.handle_uuid_conflict(entry)?,
                ConflictTag::SyncConflict => self.handle_sync_conflict(entry, session)?,
            }
        }
        Ok(ConflictOutcome {
            needs_additional_sync: !unsaved.is_empty(),
        })
    }

    fn handle_uuid_conflict(&self, entry: &UnsavedItem) -> SyncResult<()> {
        let uuid = entry.item.uuid;
        if self.store.get(uuid).is_none() {
            warn!(%uuid, "uuid conflict for an item we no longer hold");
            return Ok(());
        }
        let new_uuid = self.store.alternate_uuid(uuid)?;
        debug!(%uuid, %new_uuid, "resolved uuid conflict");
        Ok(())
    }

    fn handle_sync_conflict(
        &self,
        entry: &UnsavedItem,
        session: &AccountSession,
    ) -> SyncResult<()> {
        let server_raw = &entry.item;
        let uuid = server_raw.uuid;

        let server_content = match decrypt_item_content(server_raw, &session.keys) {
            Ok(value) => value,
            Err(e) => {
                // Undecryptable server copy: preserve it under its own
                // uuid rather than inventing a duplicate from garbage.
                warn!(%uuid, error = %e, "conflicting server item failed to decrypt");
                self.store.map_records(
                    vec![IncomingRecord::opaque(server_raw.clone())],
                    MappingSource::RemoteRetrieved,
                    &[],
                );
                return Ok(());
            }
        };

        let Some(local) = self.store.get(uuid) else {
            // Nothing local to conflict with; map the server copy in.
            self.store.map_records(
                vec![IncomingRecord::decrypted(server_raw.clone(), server_content)],
                MappingSource::RemoteRetrieved,
                &[],
            );
            return Ok(());
        };

        let mut server_probe = Item::from_record(
            server_raw,
            ItemContent::Decrypted(server_content.clone()),
            false,
        );
        server_probe.content_type = server_raw
            .content_type
            .clone()
            .unwrap_or_else(|| local.content_type.clone());

        if local.content_equals(&server_probe, &[]) {
            // Equal modulo volatile keys: no duplicate needed.
            debug!(%uuid, "sync conflict with identical content, dropping");
            return Ok(());
        }

        // The server's version becomes a new item pointing back at ours.
        let duplicate_uuid = self.provider.generate_uuid();
        let mut duplicate = Item::new(duplicate_uuid, server_probe.content_type.clone());
        duplicate.content = ItemContent::Decrypted(server_content);
        duplicate.conflict_of = Some(uuid);
        duplicate.created_at = server_raw.created_at;
        duplicate.updated_at = server_raw.updated_at;
        self.store.insert_item(duplicate);
        self.store.set_item_dirty(duplicate_uuid, true, true)?;

        for referencer in self.store.referencing_items(uuid) {
            self.store.add_relationship(referencer, duplicate_uuid)?;
            self.store.set_item_dirty(referencer, true, true)?;
        }

        debug!(%uuid, %duplicate_uuid, "sync conflict produced duplicate");
        Ok(())
    }
}
