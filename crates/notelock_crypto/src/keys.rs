//! Key containers.
//!
//! Both key sets are split views over material produced elsewhere: the
//! root set over the PBKDF2 output, the item set over a random item key.
//! All material is zeroized on drop.

use crate::error::{CryptoError, CryptoResult};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of each individual key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// The per-account key hierarchy derived from the passphrase.
///
/// The 768-bit PBKDF2 output splits into three equal parts:
/// - `server_password`: sent to the server in place of the passphrase
/// - `master_key`: encrypts per-item keys
/// - `auth_key`: authenticates per-item key envelopes
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKeySet {
    server_password: [u8; KEY_SIZE],
    master_key: [u8; KEY_SIZE],
    auth_key: [u8; KEY_SIZE],
}

impl RootKeySet {
    /// Splits a 96-byte derivation output into the three keys.
    ///
    /// # Errors
    ///
    /// Returns an error if `derived` is not exactly 96 bytes.
    pub fn from_derived(derived: &[u8]) -> CryptoResult<Self> {
        if derived.len() != KEY_SIZE * 3 {
            return Err(CryptoError::invalid_key_size(derived.len(), KEY_SIZE * 3));
        }
        let mut server_password = [0u8; KEY_SIZE];
        let mut master_key = [0u8; KEY_SIZE];
        let mut auth_key = [0u8; KEY_SIZE];
        server_password.copy_from_slice(&derived[..KEY_SIZE]);
        master_key.copy_from_slice(&derived[KEY_SIZE..KEY_SIZE * 2]);
        auth_key.copy_from_slice(&derived[KEY_SIZE * 2..]);
        Ok(Self {
            server_password,
            master_key,
            auth_key,
        })
    }

    /// Reconstructs a root key set from stored hex-encoded `mk`/`ak`.
    ///
    /// The server password is not persisted locally; it is zero here and
    /// only meaningful on a set freshly derived from the passphrase.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is not 32 bytes of hex.
    pub fn from_stored_hex(mk_hex: &str, ak_hex: &str) -> CryptoResult<Self> {
        let mk = crate::primitives::hex_decode(mk_hex)?;
        let ak = crate::primitives::hex_decode(ak_hex)?;
        if mk.len() != KEY_SIZE {
            return Err(CryptoError::invalid_key_size(mk.len(), KEY_SIZE));
        }
        if ak.len() != KEY_SIZE {
            return Err(CryptoError::invalid_key_size(ak.len(), KEY_SIZE));
        }
        let mut master_key = [0u8; KEY_SIZE];
        let mut auth_key = [0u8; KEY_SIZE];
        master_key.copy_from_slice(&mk);
        auth_key.copy_from_slice(&ak);
        Ok(Self {
            server_password: [0u8; KEY_SIZE],
            master_key,
            auth_key,
        })
    }

    /// The password substitute sent to the server, hex-encoded.
    #[must_use]
    pub fn server_password_hex(&self) -> String {
        hex::encode(self.server_password)
    }

    /// The master encryption key.
    #[must_use]
    pub fn master_key(&self) -> &[u8; KEY_SIZE] {
        &self.master_key
    }

    /// The master authentication key.
    #[must_use]
    pub fn auth_key(&self) -> &[u8; KEY_SIZE] {
        &self.auth_key
    }

    /// The master encryption key, hex-encoded for the local key store.
    #[must_use]
    pub fn master_key_hex(&self) -> String {
        hex::encode(self.master_key)
    }

    /// The master authentication key, hex-encoded for the local key store.
    #[must_use]
    pub fn auth_key_hex(&self) -> String {
        hex::encode(self.auth_key)
    }
}

impl std::fmt::Debug for RootKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKeySet")
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// The per-item key pair split from a 512-bit random item key.
///
/// The first half encrypts the item content, the second authenticates it.
/// The concatenated hex form is what gets wrapped into `enc_item_key`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ItemKeySet {
    encryption_key: [u8; KEY_SIZE],
    auth_key: [u8; KEY_SIZE],
}

impl ItemKeySet {
    /// Splits a 64-byte item key into its halves.
    ///
    /// # Errors
    ///
    /// Returns an error if `item_key` is not exactly 64 bytes.
    pub fn from_item_key(item_key: &[u8]) -> CryptoResult<Self> {
        if item_key.len() != KEY_SIZE * 2 {
            return Err(CryptoError::invalid_key_size(item_key.len(), KEY_SIZE * 2));
        }
        let mut encryption_key = [0u8; KEY_SIZE];
        let mut auth_key = [0u8; KEY_SIZE];
        encryption_key.copy_from_slice(&item_key[..KEY_SIZE]);
        auth_key.copy_from_slice(&item_key[KEY_SIZE..]);
        Ok(Self {
            encryption_key,
            auth_key,
        })
    }

    /// Parses the hex form produced by [`to_hex`](Self::to_hex).
    ///
    /// # Errors
    ///
    /// Returns an error on bad hex or wrong length.
    pub fn from_hex(hex_key: &str) -> CryptoResult<Self> {
        let bytes = crate::primitives::hex_decode(hex_key)?;
        Self::from_item_key(&bytes)
    }

    /// The concatenated hex form (ek || ak) wrapped into `enc_item_key`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(KEY_SIZE * 4);
        out.push_str(&hex::encode(self.encryption_key));
        out.push_str(&hex::encode(self.auth_key));
        out
    }

    /// The content encryption key.
    #[must_use]
    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    /// The content authentication key.
    #[must_use]
    pub fn auth_key(&self) -> &[u8; KEY_SIZE] {
        &self.auth_key
    }
}

impl std::fmt::Debug for ItemKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemKeySet")
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_split() {
        let mut derived = Vec::new();
        derived.extend_from_slice(&[1u8; 32]);
        derived.extend_from_slice(&[2u8; 32]);
        derived.extend_from_slice(&[3u8; 32]);

        let keys = RootKeySet::from_derived(&derived).unwrap();
        assert_eq!(keys.server_password_hex(), hex::encode([1u8; 32]));
        assert_eq!(keys.master_key(), &[2u8; 32]);
        assert_eq!(keys.auth_key(), &[3u8; 32]);
    }

    #[test]
    fn root_split_wrong_length() {
        assert!(RootKeySet::from_derived(&[0u8; 64]).is_err());
    }

    #[test]
    fn root_from_stored() {
        let keys =
            RootKeySet::from_stored_hex(&hex::encode([4u8; 32]), &hex::encode([5u8; 32])).unwrap();
        assert_eq!(keys.master_key(), &[4u8; 32]);
        assert_eq!(keys.auth_key(), &[5u8; 32]);
    }

    #[test]
    fn item_key_hex_roundtrip() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0xAAu8; 32]);
        raw.extend_from_slice(&[0xBBu8; 32]);

        let keys = ItemKeySet::from_item_key(&raw).unwrap();
        let parsed = ItemKeySet::from_hex(&keys.to_hex()).unwrap();
        assert_eq!(parsed.encryption_key(), &[0xAAu8; 32]);
        assert_eq!(parsed.auth_key(), &[0xBBu8; 32]);
    }

    #[test]
    fn item_key_wrong_length() {
        assert!(ItemKeySet::from_item_key(&[0u8; 32]).is_err());
        assert!(ItemKeySet::from_hex("00ff").is_err());
    }

    #[test]
    fn debug_redacts() {
        let keys = ItemKeySet::from_item_key(&[9u8; 64]).unwrap();
        assert!(!format!("{keys:?}").contains("09"));
    }
}
