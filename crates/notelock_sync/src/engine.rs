//! The sync engine.
//!
//! Drives the request/response loop against `/items/sync`: collects the
//! dirty set, encrypts, POSTs, maps the three response arrays, threads
//! the sync and cursor tokens, and fires lifecycle events. At most one
//! cycle is in flight; concurrent callers are queued as a repeat, and a
//! locked engine (sign-out) rejects them.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::http::HttpClient;
use notelock_crypto::{base64_decode_string, CryptoProvider, OsCryptoProvider, RootKeySet};
use notelock_model::{
    kv_keys, Clock, ImmediateScheduler, IncomingRecord, Item, ItemContent, ItemPersistence,
    ItemStore, KeyValueStore, MappingSource, Scheduler, SystemClock,
};
use notelock_protocol::{
    decrypt_item_content, encrypt_item_content, plaintext_envelope, AuthParams, Envelope,
    ProtocolVersion, RawItem, SyncRequest, SyncResponse, SYNC_ENDPOINT,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// The signed-in account's key material.
#[derive(Clone)]
pub struct AccountSession {
    /// Root key hierarchy.
    pub keys: RootKeySet,
    /// The derivation parameters that produced it.
    pub auth_params: AuthParams,
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("identifier", &self.auth_params.identifier)
            .finish_non_exhaustive()
    }
}

/// What a completed sync cycle produced, handed to completion hooks.
#[derive(Debug, Clone, Default)]
pub struct SyncCompletion {
    /// Items mapped from `retrieved_items`, across all rounds.
    pub retrieved_items: Vec<Item>,
    /// Items mapped from `saved_items`, across all rounds.
    pub saved_items: Vec<Item>,
    /// UUIDs the server refused.
    pub unsaved_uuids: Vec<Uuid>,
    /// The cycle started with no sync token.
    pub initial_sync: bool,
}

/// Result of a `sync()` call.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The cycle ran to completion.
    Completed(SyncCompletion),
    /// A cycle was already in flight; this call was queued and a repeat
    /// cycle will run after it.
    Queued,
}

/// Non-fatal condition reporting.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Last local persistence failure, if any. Local failures never
    /// abort the server round-trip.
    pub local_error: Option<String>,
    /// Last cycle failure, if any.
    pub sync_error: Option<String>,
}

#[derive(Default)]
struct EngineState {
    in_progress: bool,
    locked: bool,
    repeat_on_completion: bool,
}

#[derive(Default)]
struct CycleAggregate {
    retrieved: Vec<Item>,
    saved: Vec<Item>,
    unsaved: Vec<Uuid>,
    saved_uuids: HashSet<Uuid>,
}

struct RoundControl {
    continue_needed: bool,
    request_additional_fields: bool,
}

/// The client sync state machine.
pub struct SyncEngine {
    pub(crate) config: SyncConfig,
    pub(crate) store: Arc<ItemStore>,
    http: Arc<dyn HttpClient>,
    kv: Arc<dyn KeyValueStore>,
    persistence: Arc<dyn ItemPersistence>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) provider: Arc<dyn CryptoProvider>,
    scheduler: Arc<dyn Scheduler>,
    events: EventBus,
    session: RwLock<Option<AccountSession>>,
    state: Mutex<EngineState>,
    status: RwLock<SyncStatus>,
    completion_hooks: RwLock<Vec<Box<dyn Fn(&SyncCompletion) + Send + Sync>>>,
}

impl SyncEngine {
    /// Creates an engine with the default clock, RNG and scheduler.
    pub fn new(
        config: SyncConfig,
        store: Arc<ItemStore>,
        http: Arc<dyn HttpClient>,
        kv: Arc<dyn KeyValueStore>,
        persistence: Arc<dyn ItemPersistence>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            kv,
            persistence,
            clock: Arc::new(SystemClock),
            provider: Arc::new(OsCryptoProvider),
            scheduler: Arc::new(ImmediateScheduler),
            events: EventBus::new(),
            session: RwLock::new(None),
            state: Mutex::new(EngineState::default()),
            status: RwLock::new(SyncStatus::default()),
            completion_hooks: RwLock::new(Vec::new()),
        }
    }

    /// Substitutes the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitutes the randomness provider.
    pub fn with_provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Substitutes the scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// The event bus; subscribe before calling [`sync`](Self::sync).
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current non-fatal status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    /// Registers a hook fired after every completed cycle (the
    /// singleton resolver attaches here).
    pub fn register_completion_hook<F>(&self, hook: F)
    where
        F: Fn(&SyncCompletion) + Send + Sync + 'static,
    {
        self.completion_hooks.write().push(Box::new(hook));
    }

    /// Installs the account keys, persisting `mk`/`ak`/`auth_params`.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth params cannot be serialized.
    pub fn set_session(&self, session: AccountSession) -> SyncResult<()> {
        self.kv.set(kv_keys::MK, &session.keys.master_key_hex());
        self.kv.set(kv_keys::AK, &session.keys.auth_key_hex());
        self.kv.set(
            kv_keys::AUTH_PARAMS,
            &serde_json::to_string(&session.auth_params)?,
        );
        *self.session.write() = Some(session);
        Ok(())
    }

    /// Stores the bearer token used for sync requests.
    pub fn set_jwt(&self, jwt: &str) {
        self.kv.set(kv_keys::JWT, jwt);
    }

    /// Whether keys are available for an online sync.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.session.read().is_some()
    }

    /// Rejects new sync calls (used during sign-out).
    pub fn lock_sync(&self) {
        self.state.lock().locked = true;
    }

    /// Accepts sync calls again.
    pub fn unlock_sync(&self) {
        self.state.lock().locked = false;
    }

    /// Clears the session, tokens and local data on sign-out. The
    /// engine stays locked; call [`unlock_sync`](Self::unlock_sync) for
    /// the next account.
    pub fn handle_sign_out(&self) {
        self.lock_sync();
        *self.session.write() = None;
        for key in [
            kv_keys::SYNC_TOKEN,
            kv_keys::CURSOR_TOKEN,
            kv_keys::MK,
            kv_keys::AK,
            kv_keys::AUTH_PARAMS,
            kv_keys::JWT,
        ] {
            self.kv.remove(key);
        }
        if let Err(e) = self.persistence.clear() {
            self.status.write().local_error = Some(e.to_string());
        }
    }

    /// Runs a sync cycle, or queues one if a cycle is in flight.
    ///
    /// # Errors
    ///
    /// `Locked` when sign-out is in progress; transport, HTTP and
    /// protocol failures otherwise. All error paths leave the store and
    /// tokens resumable.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        {
            let mut state = self.state.lock();
            if state.locked {
                return Err(SyncError::Locked);
            }
            if state.in_progress {
                state.repeat_on_completion = true;
                return Ok(SyncOutcome::Queued);
            }
            state.in_progress = true;
        }

        let mut result = self.run_session();
        loop {
            let repeat = {
                let mut state = self.state.lock();
                if result.is_ok() && state.repeat_on_completion {
                    state.repeat_on_completion = false;
                    true
                } else {
                    state.in_progress = false;
                    state.repeat_on_completion = false;
                    false
                }
            };
            if !repeat {
                break;
            }
            result = self.run_session();
        }

        match &result {
            Ok(completion) => {
                self.status.write().sync_error = None;
                // Completion fan-out happens once, after any queued
                // repeats have drained.
                self.finish_cycle(completion);
            }
            Err(e) => self.status.write().sync_error = Some(e.to_string()),
        }
        result.map(SyncOutcome::Completed)
    }

    /// One full cycle: all continuation rounds.
    fn run_session(&self) -> SyncResult<SyncCompletion> {
        let initial_sync = self.kv.get(kv_keys::SYNC_TOKEN).is_none();

        if !self.is_online() {
            return self.sync_offline(initial_sync);
        }

        let mut aggregate = CycleAggregate::default();
        let mut additional_fields: Vec<&str> = Vec::new();
        loop {
            let control = self.run_round(&mut aggregate, &additional_fields)?;
            if control.request_additional_fields {
                additional_fields = vec!["created_at", "updated_at"];
            }
            if control.continue_needed {
                // A yield between rounds, not a back-off.
                self.scheduler.schedule(Box::new(|| {}));
                std::thread::sleep(self.config.continuation_delay);
                continue;
            }
            break;
        }

        Ok(SyncCompletion {
            retrieved_items: aggregate.retrieved,
            saved_items: aggregate.saved,
            unsaved_uuids: aggregate.unsaved,
            initial_sync,
        })
    }

    fn finish_cycle(&self, completion: &SyncCompletion) {
        for hook in self.completion_hooks.read().iter() {
            hook(completion);
        }
        self.events.emit(SyncEvent::Completed {
            retrieved: completion.retrieved_items.iter().map(|i| i.uuid).collect(),
            saved: completion.saved_items.iter().map(|i| i.uuid).collect(),
            unsaved: completion.unsaved_uuids.clone(),
            initial_sync: completion.initial_sync,
        });
    }

    /// Offline path: items settle into local storage; no HTTP.
    fn sync_offline(&self, initial_sync: bool) -> SyncResult<SyncCompletion> {
        let dirty = self.store.sync_eligible_items();
        let dirty_uuids: Vec<Uuid> = dirty.iter().map(|i| i.uuid).collect();
        debug!(count = dirty.len(), "offline sync");

        self.store.stamp_updated_at(&dirty_uuids, self.clock.now());

        let records: Vec<RawItem> = self
            .store
            .all_items()
            .iter()
            .map(|item| self.encode_for_disk(item))
            .collect();
        if let Err(e) = self.persistence.save_items(&records) {
            warn!(error = %e, "local save failed");
            self.status.write().local_error = Some(e.to_string());
        }

        for item in &dirty {
            if item.deleted {
                self.store.remove_item_locally(item.uuid);
                if let Err(e) = self.persistence.delete_item(item.uuid) {
                    self.status.write().local_error = Some(e.to_string());
                }
            }
        }

        // The dirty flag is suppressed only in the disk records; the
        // in-memory state stays dirty so everything rides the first
        // online cycle once keys arrive.
        Ok(SyncCompletion {
            initial_sync,
            ..SyncCompletion::default()
        })
    }

    /// One request round.
    fn run_round(
        &self,
        aggregate: &mut CycleAggregate,
        additional_fields: &[&str],
    ) -> SyncResult<RoundControl> {
        let Some(session) = self.session.read().clone() else {
            // Signed out between rounds.
            return Err(SyncError::Locked);
        };

        let eligible = self.store.sync_eligible_items();
        let needs_more_sync = eligible.len() > self.config.request_item_cap;
        let batch: Vec<Item> = eligible
            .into_iter()
            .take(self.config.request_item_cap)
            .collect();

        let mut wire_items = Vec::with_capacity(batch.len());
        for item in &batch {
            match self.encode_for_wire(item, &session, additional_fields) {
                Ok(raw) => wire_items.push(raw),
                Err(e) => {
                    // Stays dirty and rides a later cycle.
                    warn!(uuid = %item.uuid, error = %e, "failed to prepare item for sync");
                    self.events.emit(SyncEvent::Exception(e.to_string()));
                }
            }
        }
        let submitted_uuids: Vec<Uuid> = wire_items.iter().map(|raw| raw.uuid).collect();

        // Snapshot at send time: re-dirtying during the flight bumps the
        // count and blocks the clear below.
        self.store.reset_dirty_counts(&submitted_uuids);

        // On a crash mid-flight the local store is authoritative.
        let disk_records: Vec<RawItem> = wire_items
            .iter()
            .cloned()
            .map(|mut raw| {
                raw.dirty = Some(true);
                raw
            })
            .collect();
        if let Err(e) = self.persistence.save_items(&disk_records) {
            self.status.write().local_error = Some(e.to_string());
        }

        let request = SyncRequest {
            items: wire_items,
            sync_token: self.kv.get(kv_keys::SYNC_TOKEN),
            cursor_token: self.kv.get(kv_keys::CURSOR_TOKEN),
            limit: self.config.response_limit,
        };
        let body = serde_json::to_string(&request)?;
        let url = format!("{}{}", self.config.server_url, SYNC_ENDPOINT);
        let jwt = self.kv.get(kv_keys::JWT);

        let watchdog_stop = self.start_watchdog();
        let result = self.http.post_json(&url, &body, jwt.as_deref());
        watchdog_stop.store(true, Ordering::SeqCst);

        let response = match result {
            Err(message) => {
                self.events.emit(SyncEvent::SyncError(message.clone()));
                return Err(SyncError::transport(message));
            }
            Ok(response) if response.status == 401 => {
                self.events.emit(SyncEvent::SessionInvalid);
                self.events
                    .emit(SyncEvent::SyncError("session invalid".into()));
                return Err(SyncError::SessionInvalid);
            }
            Ok(response) if !response.is_success() => {
                self.events.emit(SyncEvent::SyncError(format!(
                    "server returned status {}",
                    response.status
                )));
                return Err(SyncError::Http {
                    status: response.status,
                });
            }
            Ok(response) => response,
        };

        let response: SyncResponse = serde_json::from_str(&response.body)?;
        debug!(
            retrieved = response.retrieved_items.len(),
            saved = response.saved_items.len(),
            unsaved = response.unsaved.len(),
            "sync round response"
        );

        // Saved items accumulated this cycle take precedence: a uuid we
        // just pushed must not double back through retrieved.
        aggregate
            .saved_uuids
            .extend(response.saved_items.iter().map(|r| r.uuid));
        let retrieved_records: Vec<IncomingRecord> = response
            .retrieved_items
            .iter()
            .filter(|raw| !aggregate.saved_uuids.contains(&raw.uuid))
            .map(|raw| self.decode_record(raw.clone(), Some(&session)))
            .collect();
        let mapped_retrieved =
            self.store
                .map_records(retrieved_records, MappingSource::RemoteRetrieved, &[]);

        // Saved echoes carry metadata only; the cached content is
        // authoritative.
        let saved_records: Vec<IncomingRecord> = response
            .saved_items
            .iter()
            .map(|raw| self.decode_record(raw.clone(), Some(&session)))
            .collect();
        let mapped_saved = self.store.map_records(
            saved_records,
            MappingSource::RemoteSaved,
            &["content", "auth_hash"],
        );

        let conflicts = self.process_unsaved(&response.unsaved, &session)?;
        aggregate
            .unsaved
            .extend(response.unsaved.iter().map(|u| u.item.uuid));

        // Clear only what nobody re-dirtied mid-flight.
        self.store.clear_dirty_if_unchanged(&submitted_uuids);

        // Acked deletions are reaped; their uuids are shielded from late
        // echoes.
        for uuid in &submitted_uuids {
            if let Some(item) = self.store.get(*uuid) {
                if item.deleted && !item.is_dirty() {
                    self.store.remove_item_locally(*uuid);
                    if let Err(e) = self.persistence.delete_item(*uuid) {
                        self.status.write().local_error = Some(e.to_string());
                    }
                }
            }
        }

        // Saved and retrieved state persists before the next round.
        let persist_records: Vec<RawItem> = mapped_retrieved
            .iter()
            .chain(mapped_saved.iter())
            .filter(|item| !item.deleted)
            .map(|item| self.encode_for_disk(item))
            .collect();
        if let Err(e) = self.persistence.save_items(&persist_records) {
            self.status.write().local_error = Some(e.to_string());
        }

        if let Some(token) = &response.sync_token {
            self.kv.set(kv_keys::SYNC_TOKEN, token);
            self.events.emit(SyncEvent::UpdatedToken(token.clone()));
        }
        let has_cursor = response.cursor_token.is_some();
        match &response.cursor_token {
            Some(cursor) => self.kv.set(kv_keys::CURSOR_TOKEN, cursor),
            None => self.kv.remove(kv_keys::CURSOR_TOKEN),
        }

        let threshold = self.config.major_change_threshold;
        if mapped_retrieved.len() >= threshold
            || mapped_saved.len() >= threshold
            || response.unsaved.len() >= threshold
        {
            self.events.emit(SyncEvent::MajorDataChange);
        }

        aggregate.retrieved.extend(mapped_retrieved);
        aggregate.saved.extend(mapped_saved);

        Ok(RoundControl {
            continue_needed: has_cursor || needs_more_sync || conflicts.needs_additional_sync,
            request_additional_fields: conflicts.needs_additional_sync,
        })
    }

    fn start_watchdog(&self) -> Arc<AtomicBool> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let events = self.events.clone();
        let interval = self.config.watchdog_interval;
        let threshold = self.config.watchdog_threshold;
        std::thread::spawn(move || {
            let start = Instant::now();
            loop {
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                if start.elapsed() >= threshold {
                    events.emit(SyncEvent::TakingTooLong);
                    return;
                }
                std::thread::sleep(interval);
            }
        });
        stop
    }

    /// Loads persisted records into the store in chunks, yielding to the
    /// scheduler between chunks so observers and UI can breathe.
    ///
    /// # Errors
    ///
    /// Returns an error when the persistence adapter cannot load.
    pub fn load_local_items(&self) -> SyncResult<()> {
        let records = self.persistence.load_all()?;
        let session = self.session.read().clone();
        debug!(count = records.len(), "loading local items");

        for (index, chunk) in records.chunks(self.config.load_batch_size).enumerate() {
            if index > 0 {
                self.scheduler.schedule(Box::new(|| {}));
            }
            let incoming: Vec<IncomingRecord> = chunk
                .iter()
                .map(|raw| self.decode_record(raw.clone(), session.as_ref()))
                .collect();
            self.store
                .map_records(incoming, MappingSource::LocalRetrieved, &[]);
        }

        self.events.emit(SyncEvent::LocalDataLoaded);
        Ok(())
    }

    /// Builds the wire record for an item being pushed.
    pub(crate) fn encode_for_wire(
        &self,
        item: &Item,
        session: &AccountSession,
        additional_fields: &[&str],
    ) -> SyncResult<RawItem> {
        let mut raw = RawItem::new(item.uuid);
        raw.content_type = Some(item.content_type.clone());
        raw.created_at = item.created_at;
        raw.deleted = item.deleted;
        if additional_fields.contains(&"updated_at") {
            raw.updated_at = item.updated_at;
        }
        if item.deleted {
            // Tombstones carry no content.
            return Ok(raw);
        }
        match &item.content {
            ItemContent::Decrypted(value) => {
                let encrypted = encrypt_item_content(
                    item.uuid,
                    value,
                    &session.keys,
                    ProtocolVersion::LATEST,
                    &session.auth_params,
                    self.provider.as_ref(),
                )?;
                raw.content = Some(encrypted.content);
                raw.enc_item_key = Some(encrypted.enc_item_key);
                raw.auth_params = Some(session.auth_params.embedded());
            }
            ItemContent::Opaque { raw: preserved } => {
                // Never re-encrypted; the preserved ciphertext rides as-is.
                raw.content = Some(preserved.clone());
                raw.enc_item_key = item.enc_item_key.clone();
                raw.auth_hash = item.auth_hash.clone();
            }
        }
        Ok(raw)
    }

    /// Builds the disk record for an item: encrypted when keys are
    /// present, a `000` plaintext wrapper otherwise, dirty suppressed.
    pub(crate) fn encode_for_disk(&self, item: &Item) -> RawItem {
        let mut raw = RawItem::new(item.uuid);
        raw.content_type = Some(item.content_type.clone());
        raw.created_at = item.created_at;
        raw.updated_at = item.updated_at;
        raw.deleted = item.deleted;

        match &item.content {
            ItemContent::Opaque { raw: preserved } => {
                raw.content = Some(preserved.clone());
                raw.enc_item_key = item.enc_item_key.clone();
                raw.auth_hash = item.auth_hash.clone();
                raw.error_decrypting = Some(true);
            }
            ItemContent::Decrypted(value) => {
                let session = self.session.read().clone();
                let encoded = session.and_then(|session| {
                    encrypt_item_content(
                        item.uuid,
                        value,
                        &session.keys,
                        ProtocolVersion::LATEST,
                        &session.auth_params,
                        self.provider.as_ref(),
                    )
                    .ok()
                });
                match encoded {
                    Some(encrypted) => {
                        raw.content = Some(encrypted.content);
                        raw.enc_item_key = Some(encrypted.enc_item_key);
                    }
                    None => {
                        if let Ok(envelope) = plaintext_envelope(value) {
                            raw.content = Some(envelope.to_string());
                        }
                    }
                }
            }
        }
        raw
    }

    /// Decodes a record into mapper input, attempting decryption when a
    /// session is available.
    pub(crate) fn decode_record(
        &self,
        raw: RawItem,
        session: Option<&AccountSession>,
    ) -> IncomingRecord {
        if raw.deleted || raw.content.is_none() {
            return IncomingRecord::bare(raw);
        }
        let content = raw.content.as_deref().unwrap_or_default();

        // Plaintext wrappers decode without keys.
        if let Ok(Envelope::Plaintext { payload }) = Envelope::parse(content) {
            return match base64_decode_string(&payload)
                .ok()
                .and_then(|json| serde_json::from_str(&json).ok())
            {
                Some(value) => IncomingRecord::decrypted(raw, value),
                None => IncomingRecord::opaque(raw),
            };
        }

        match session {
            Some(session) => match decrypt_item_content(&raw, &session.keys) {
                Ok(value) => IncomingRecord::decrypted(raw, value),
                Err(e) => {
                    warn!(uuid = %raw.uuid, error = %e, "item failed to decrypt");
                    IncomingRecord::opaque(raw)
                }
            },
            // Encrypted content with no keys on hand stays opaque.
            None => IncomingRecord::opaque(raw),
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SyncEngine")
            .field("server_url", &self.config.server_url)
            .field("in_progress", &state.in_progress)
            .field("locked", &state.locked)
            .finish_non_exhaustive()
    }
}
