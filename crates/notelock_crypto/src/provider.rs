//! Randomness and UUID provider.
//!
//! Components never reach for a global RNG; they take a provider so tests
//! can substitute a deterministic source.

use rand::RngCore;
use uuid::Uuid;

/// Source of randomness and fresh UUIDs.
pub trait CryptoProvider: Send + Sync {
    /// Fills and returns `n` random bytes.
    fn random_bytes(&self, n: usize) -> Vec<u8>;

    /// Generates a fresh item UUID.
    fn generate_uuid(&self) -> Uuid;
}

/// Default provider backed by the OS RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsCryptoProvider;

impl CryptoProvider for OsCryptoProvider {
    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        rand::thread_rng().fill_bytes(&mut out);
        out
    }

    fn generate_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}
