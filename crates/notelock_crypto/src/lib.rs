//! # Notelock Crypto
//!
//! Cryptographic primitives for the Notelock client.
//!
//! This crate provides:
//! - PBKDF2-HMAC-SHA512 key stretching
//! - AES-256-CBC with PKCS7 padding
//! - HMAC-SHA256 with constant-time verification
//! - Key containers that zeroize on drop
//! - A pluggable randomness/UUID provider for deterministic tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod keys;
mod primitives;
mod provider;

pub use error::{CryptoError, CryptoResult};
pub use keys::{ItemKeySet, RootKeySet, KEY_SIZE};
pub use primitives::{
    aes256_cbc_decrypt, aes256_cbc_encrypt, base64_decode, base64_decode_string, base64_encode,
    hex_decode, hmac_sha256, pbkdf2_sha512, sha256_hex, verify_hmac_sha256, IV_SIZE,
};
pub use provider::{CryptoProvider, OsCryptoProvider};
