//! Deterministic fixtures.

use chrono::{DateTime, Duration, TimeZone, Utc};
use notelock_crypto::{CryptoProvider, RootKeySet};
use notelock_model::{Clock, ImmediateScheduler, ItemStore};
use notelock_protocol::{derive_root_keys, AuthParams, RawItem};
use notelock_sync::AccountSession;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// A crypto provider with a fully deterministic byte stream and UUID
/// sequence. Every instance starts from the same state.
#[derive(Debug, Default)]
pub struct FixedCryptoProvider {
    counter: AtomicU64,
}

impl FixedCryptoProvider {
    /// Creates a provider at its initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CryptoProvider for FixedCryptoProvider {
    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let seed = self.counter.fetch_add(1, Ordering::SeqCst);
        (0..n)
            .map(|i| (seed.wrapping_mul(131).wrapping_add(i as u64 * 7) % 251) as u8)
            .collect()
    }

    fn generate_uuid(&self) -> Uuid {
        let seed = self.counter.fetch_add(1, Ordering::SeqCst);
        Uuid::from_u128(0x4000_8000_0000_0000_0000_u128 + u128::from(seed))
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock at a fixed, readable instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: RwLock::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    /// Creates a clock at a given instant.
    #[must_use]
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Auth params used by every fixture account.
#[must_use]
pub fn test_auth_params() -> AuthParams {
    AuthParams::v003("user@example.com", 110_000, "test-nonce")
}

/// Root keys for the fixture account, derived once and cached.
#[must_use]
pub fn test_root_keys() -> RootKeySet {
    static KEYS: OnceLock<RootKeySet> = OnceLock::new();
    KEYS.get_or_init(|| {
        derive_root_keys("correct horse battery staple", &test_auth_params())
            .expect("fixture params are valid")
    })
    .clone()
}

/// A ready account session for the fixture account.
#[must_use]
pub fn test_session() -> AccountSession {
    AccountSession {
        keys: test_root_keys(),
        auth_params: test_auth_params(),
    }
}

/// An item store wired with deterministic scheduler, clock and RNG.
#[must_use]
pub fn deterministic_store() -> Arc<ItemStore> {
    Arc::new(ItemStore::new(
        Arc::new(ImmediateScheduler),
        Arc::new(ManualClock::new()),
        Arc::new(FixedCryptoProvider::new()),
    ))
}

/// A raw note record with decryptable-as-plaintext content.
#[must_use]
pub fn plaintext_note_record(uuid: Uuid, text: &str) -> RawItem {
    let content = serde_json::json!({ "text": text, "references": [] });
    let envelope = notelock_protocol::plaintext_envelope(&content).expect("serializable");
    let mut raw = RawItem::new(uuid);
    raw.content_type = Some("Note".into());
    raw.content = Some(envelope.to_string());
    raw
}

/// A raw note record encrypted under the fixture account's keys.
#[must_use]
pub fn encrypted_note_record(uuid: Uuid, content: &serde_json::Value) -> RawItem {
    let encrypted = notelock_protocol::encrypt_item_content(
        uuid,
        content,
        &test_root_keys(),
        notelock_protocol::ProtocolVersion::LATEST,
        &test_auth_params(),
        &FixedCryptoProvider::new(),
    )
    .expect("fixture encryption succeeds");
    let mut raw = RawItem::new(uuid);
    raw.content_type = Some("Note".into());
    raw.content = Some(encrypted.content);
    raw.enc_item_key = Some(encrypted.enc_item_key);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use notelock_protocol::decrypt_item_content;

    #[test]
    fn fixed_provider_is_deterministic() {
        let a = FixedCryptoProvider::new();
        let b = FixedCryptoProvider::new();
        assert_eq!(a.random_bytes(16), b.random_bytes(16));
        assert_eq!(a.generate_uuid(), b.generate_uuid());
        // But the stream advances within one provider.
        assert_ne!(a.generate_uuid(), a.generate_uuid());
    }

    #[test]
    fn manual_clock_advances_only_on_demand() {
        let clock = ManualClock::new();
        let start = clock.now();
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }

    #[test]
    fn encrypted_fixture_roundtrips() {
        let uuid = Uuid::new_v4();
        let content = serde_json::json!({"text": "hello"});
        let raw = encrypted_note_record(uuid, &content);
        let decrypted = decrypt_item_content(&raw, &test_root_keys()).unwrap();
        assert_eq!(decrypted, content);
    }
}
