//! # Notelock Model
//!
//! The authoritative local model of items and their references.
//!
//! This crate provides:
//! - The [`Item`] entity with dirty tracking and app-data
//! - The [`ItemStore`]: UUID index, reference graph, deferred-reference
//!   resolution, server-response mapping and UUID re-issuance
//! - Predicates for querying items
//! - Local persistence traits (key/value and item records)
//! - The singleton resolver

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod item;
mod persistence;
mod predicate;
mod scheduler;
mod singleton;
mod store;

pub use clock::{Clock, SystemClock};
pub use error::{ModelError, ModelResult};
pub use item::{
    deep_merge, Item, ItemContent, ItemReference, CLIENT_UPDATED_AT_KEY, DEFAULT_APP_DOMAIN,
};
pub use persistence::{
    kv_keys, ItemPersistence, KeyValueStore, MemoryItemPersistence, MemoryKeyValueStore,
    MigrationLedger,
};
pub use predicate::{Predicate, PredicateOperator, PredicateValue};
pub use scheduler::{ImmediateScheduler, Scheduler};
pub use singleton::{SingletonResolver, SingletonStatus};
pub use store::{IncomingRecord, ItemStore, MappingSource};
