//! Singleton resolution.
//!
//! Some item classes (user preferences, server extensions) must exist at
//! most once per account. Clients that create the "same" singleton
//! offline converge here: after every sync completion all matching items
//! are enumerated and every copy but the earliest-created is deleted.
//! Earliest `created_at` is the tie-break so every client picks the same
//! winner no matter who refreshes first.

use crate::clock::Clock;
use crate::item::Item;
use crate::predicate::Predicate;
use crate::store::ItemStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type ResolutionCallback = Box<dyn Fn(&Item) + Send + Sync>;
type CreateBlock = Box<dyn Fn(&ItemStore) -> Uuid + Send + Sync>;

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingletonStatus {
    /// Duplicates were marked deleted; the caller should trigger a sync.
    pub needs_sync: bool,
}

struct Registration {
    predicates: Vec<Predicate>,
    resolution: ResolutionCallback,
    create: CreateBlock,
    bound: Option<Uuid>,
    create_in_flight: bool,
}

/// Maintains at most one live instance per registered predicate set.
pub struct SingletonResolver {
    store: Arc<ItemStore>,
    clock: Arc<dyn Clock>,
    registrations: Mutex<Vec<Registration>>,
}

impl SingletonResolver {
    /// Creates a resolver over the store.
    pub fn new(store: Arc<ItemStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Registers a singleton class.
    ///
    /// `resolution` fires whenever the singleton binds (or rebinds);
    /// `create` is invoked to produce a fresh instance when no match
    /// exists after initial load.
    pub fn register<R, C>(&self, predicates: Vec<Predicate>, resolution: R, create: C)
    where
        R: Fn(&Item) + Send + Sync + 'static,
        C: Fn(&ItemStore) -> Uuid + Send + Sync + 'static,
    {
        self.registrations.lock().push(Registration {
            predicates,
            resolution: Box::new(resolution),
            create: Box::new(create),
            bound: None,
            create_in_flight: false,
        });
    }

    /// Runs resolution after the initial local data load.
    pub fn handle_initial_load(&self) -> SingletonStatus {
        let mut status = SingletonStatus::default();
        let mut registrations = self.registrations.lock();
        for registration in registrations.iter_mut() {
            let locals = self.store.items_matching(&registration.predicates);
            status.needs_sync |= self.resolve(registration, locals, true);
        }
        status
    }

    /// Runs resolution against a completed sync cycle's retrieved and
    /// saved items.
    pub fn handle_sync_completion(&self, retrieved: &[Item], saved: &[Item]) -> SingletonStatus {
        let now = self.clock.now();
        let mut status = SingletonStatus::default();
        let mut registrations = self.registrations.lock();
        for registration in registrations.iter_mut() {
            let remote_match = retrieved
                .iter()
                .chain(saved.iter())
                .any(|item| registration.predicates.iter().all(|p| p.evaluate(item, now)));

            if remote_match {
                let locals = self.store.items_matching(&registration.predicates);
                status.needs_sync |= self.resolve(registration, locals, false);
            } else if registration.bound.is_none() && !registration.create_in_flight {
                // No copy anywhere: create one.
                self.create_instance(registration);
            }
        }
        status
    }

    /// Rebinds a singleton whose item had its UUID re-issued.
    pub fn handle_uuid_change(&self, old: Uuid, new: Uuid) {
        let mut registrations = self.registrations.lock();
        for registration in registrations.iter_mut() {
            if registration.bound == Some(old) {
                registration.bound = Some(new);
            }
        }
    }

    /// Enumerate-and-dedupe for one registration. Returns whether a sync
    /// is needed.
    fn resolve(&self, registration: &mut Registration, mut locals: Vec<Item>, allow_create: bool) -> bool {
        match locals.len() {
            0 => {
                if allow_create && registration.bound.is_none() && !registration.create_in_flight {
                    self.create_instance(registration);
                }
                false
            }
            1 => {
                // Binds only when no singleton is bound yet; an already
                // bound registration leaves a lone match alone.
                let winner = locals.remove(0);
                if registration.bound.is_none() {
                    registration.bound = Some(winner.uuid);
                    (registration.resolution)(&winner);
                }
                false
            }
            _ => {
                locals.sort_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.uuid.cmp(&b.uuid))
                });
                let winner = locals.remove(0);
                debug!(
                    winner = %winner.uuid,
                    losers = locals.len(),
                    "deduplicating singleton"
                );
                for loser in &locals {
                    let _ = self.store.modify_item(loser.uuid, |item| item.deleted = true);
                    let _ = self.store.set_item_dirty(loser.uuid, true, true);
                }
                registration.bound = Some(winner.uuid);
                (registration.resolution)(&winner);
                true
            }
        }
    }

    fn create_instance(&self, registration: &mut Registration) {
        registration.create_in_flight = true;
        let uuid = (registration.create)(&self.store);
        registration.create_in_flight = false;
        registration.bound = Some(uuid);
        if let Some(item) = self.store.get(uuid) {
            (registration.resolution)(&item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::predicate::{Predicate, PredicateOperator};
    use crate::scheduler::ImmediateScheduler;
    use chrono::{Duration, Utc};
    use notelock_crypto::OsCryptoProvider;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> Arc<ItemStore> {
        Arc::new(ItemStore::new(
            Arc::new(ImmediateScheduler),
            Arc::new(SystemClock),
            Arc::new(OsCryptoProvider),
        ))
    }

    fn prefs_predicate() -> Vec<Predicate> {
        vec![Predicate::new(
            "content_type",
            PredicateOperator::Eq,
            "Preferences".into(),
        )]
    }

    fn resolver(store: &Arc<ItemStore>) -> SingletonResolver {
        SingletonResolver::new(Arc::clone(store), Arc::new(SystemClock))
    }

    #[test]
    fn creates_when_absent_after_initial_load() {
        let store = store();
        let resolver = resolver(&store);
        let resolutions = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&resolutions);

        resolver.register(
            prefs_predicate(),
            move |_item| {
                count.fetch_add(1, Ordering::SeqCst);
            },
            |store| store.create_item("Preferences", json!({})),
        );

        let status = resolver.handle_initial_load();
        assert!(!status.needs_sync);
        assert_eq!(resolutions.load(Ordering::SeqCst), 1);
        assert_eq!(store.items_matching(&prefs_predicate()).len(), 1);

        // Idempotent: a second pass neither creates nor re-fires.
        resolver.handle_initial_load();
        assert_eq!(resolutions.load(Ordering::SeqCst), 1);
        assert_eq!(store.items_matching(&prefs_predicate()).len(), 1);
    }

    #[test]
    fn earliest_created_wins_dedupe() {
        let store = store();
        let resolver = resolver(&store);

        let older = store.create_item("Preferences", json!({"which": "older"}));
        let newer = store.create_item("Preferences", json!({"which": "newer"}));
        let base = Utc::now();
        store
            .modify_item(older, |item| item.created_at = Some(base - Duration::days(2)))
            .unwrap();
        store
            .modify_item(newer, |item| item.created_at = Some(base - Duration::days(1)))
            .unwrap();

        let bound = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&bound);
        resolver.register(
            prefs_predicate(),
            move |item| *slot.lock() = Some(item.uuid),
            |store| store.create_item("Preferences", json!({})),
        );

        let retrieved = vec![store.get(newer).unwrap()];
        let status = resolver.handle_sync_completion(&retrieved, &[]);

        assert!(status.needs_sync);
        assert_eq!(*bound.lock(), Some(older));

        // The loser is deleted and dirty, awaiting its sync.
        let loser = store.get(newer).unwrap();
        assert!(loser.deleted);
        assert!(loser.is_dirty());

        // Only the winner satisfies the predicate now.
        assert_eq!(store.items_matching(&prefs_predicate()).len(), 1);
    }

    #[test]
    fn binds_single_match_without_dedupe() {
        let store = store();
        let resolver = resolver(&store);
        let uuid = store.create_item("Preferences", json!({}));

        let bound = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&bound);
        resolver.register(
            prefs_predicate(),
            move |item| *slot.lock() = Some(item.uuid),
            |store| store.create_item("Preferences", json!({})),
        );

        let retrieved = vec![store.get(uuid).unwrap()];
        let status = resolver.handle_sync_completion(&retrieved, &[]);
        assert!(!status.needs_sync);
        assert_eq!(*bound.lock(), Some(uuid));
    }

    #[test]
    fn creates_on_sync_completion_when_unbound() {
        let store = store();
        let resolver = resolver(&store);
        resolver.register(
            prefs_predicate(),
            |_item| {},
            |store| store.create_item("Preferences", json!({})),
        );

        // No remote or local match at all.
        resolver.handle_sync_completion(&[], &[]);
        assert_eq!(store.items_matching(&prefs_predicate()).len(), 1);
    }

    #[test]
    fn rebinds_after_uuid_change() {
        let store = store();
        let resolver = resolver(&store);
        let uuid = store.create_item("Preferences", json!({}));

        resolver.register(
            prefs_predicate(),
            |_item| {},
            |store| store.create_item("Preferences", json!({})),
        );
        let retrieved = vec![store.get(uuid).unwrap()];
        resolver.handle_sync_completion(&retrieved, &[]);

        let new_uuid = store.alternate_uuid(uuid).unwrap();
        resolver.handle_uuid_change(uuid, new_uuid);

        // Bound to the new identity: a matching pass does not create a
        // second instance.
        let retrieved = vec![store.get(new_uuid).unwrap()];
        let status = resolver.handle_sync_completion(&retrieved, &[]);
        assert!(!status.needs_sync);
        assert_eq!(store.items_matching(&prefs_predicate()).len(), 1);
    }
}
