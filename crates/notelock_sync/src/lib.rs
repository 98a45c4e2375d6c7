//! # Notelock Sync
//!
//! The client half of the incremental push/pull sync protocol.
//!
//! This crate provides:
//! - The [`SyncEngine`] state machine: at-most-one-in-flight cycles,
//!   offline queueing, batching, token threading and lifecycle events
//! - Sync-conflict and UUID-conflict resolution
//! - The HTTP client abstraction the engine drives

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod engine;
mod error;
mod events;
mod http;

pub use config::SyncConfig;
pub use engine::{AccountSession, SyncCompletion, SyncEngine, SyncOutcome, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use http::{HttpClient, HttpResponse};
