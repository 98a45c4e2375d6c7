//! # Notelock Protocol
//!
//! The versioned encryption protocol and sync wire format.
//!
//! This crate provides:
//! - Protocol versions `001`/`002`/`003` and their derivation rules
//! - The colon-delimited ciphertext envelope, one parser per version
//! - Per-item key wrapping and authenticated content encryption
//! - The `/items/sync` request and response records

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth_params;
mod codec;
mod derivation;
mod envelope;
mod error;
mod messages;
mod version;

pub use auth_params::AuthParams;
pub use codec::{
    decrypt_envelope, decrypt_item_content, encrypt_item_content, encrypt_to_envelope,
    plaintext_envelope, EncryptedItemContent,
};
pub use derivation::{derive_root_keys, generate_salt};
pub use envelope::Envelope;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ConflictError, ConflictTag, RawItem, SyncRequest, SyncResponse, UnsavedItem, SYNC_ENDPOINT,
};
pub use version::ProtocolVersion;
