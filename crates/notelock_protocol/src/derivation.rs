//! Passphrase key derivation.

use crate::auth_params::AuthParams;
use crate::error::{ProtocolError, ProtocolResult};
use crate::version::ProtocolVersion;
use notelock_crypto::{pbkdf2_sha512, sha256_hex, RootKeySet, KEY_SIZE};

/// Total PBKDF2 output: three 256-bit keys.
const DERIVED_LEN: usize = KEY_SIZE * 3;

/// Computes the version-`003` salt from the account identifier and the
/// server-issued nonce.
///
/// The salt is `SHA-256(identifier:SF:version:cost:nonce)`, so two
/// accounts with the same passphrase never share a derivation input.
#[must_use]
pub fn generate_salt(
    identifier: &str,
    version: ProtocolVersion,
    pw_cost: u32,
    pw_nonce: &str,
) -> String {
    let preimage = format!("{identifier}:SF:{version}:{pw_cost}:{pw_nonce}");
    sha256_hex(preimage.as_bytes())
}

/// Derives the root key hierarchy from a passphrase and auth params.
///
/// # Errors
///
/// Returns an error when the params fail [`AuthParams::validate`], most
/// importantly when the iteration count sits below the version minimum.
pub fn derive_root_keys(password: &str, params: &AuthParams) -> ProtocolResult<RootKeySet> {
    params.validate()?;

    let salt = match params.version {
        ProtocolVersion::V003 => {
            let nonce = params
                .pw_nonce
                .as_deref()
                .ok_or(ProtocolError::MissingParameter("pw_nonce"))?;
            generate_salt(&params.identifier, params.version, params.pw_cost, nonce)
        }
        ProtocolVersion::V001 | ProtocolVersion::V002 => params
            .pw_salt
            .clone()
            .ok_or(ProtocolError::MissingParameter("pw_salt"))?,
    };

    let derived = pbkdf2_sha512(
        password.as_bytes(),
        salt.as_bytes(),
        params.pw_cost,
        DERIVED_LEN,
    );
    Ok(RootKeySet::from_derived(&derived)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_stable() {
        let a = generate_salt("user@example.com", ProtocolVersion::V003, 110_000, "nonce1");
        let b = generate_salt("user@example.com", ProtocolVersion::V003, 110_000, "nonce1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = generate_salt("user@example.com", ProtocolVersion::V003, 110_000, "nonce2");
        assert_ne!(a, c);
    }

    #[test]
    fn derive_is_deterministic() {
        let params = AuthParams::v003("user@example.com", 110_000, "nonce");
        let a = derive_root_keys("correct horse", &params).unwrap();
        let b = derive_root_keys("correct horse", &params).unwrap();
        assert_eq!(a.master_key(), b.master_key());
        assert_eq!(a.auth_key(), b.auth_key());

        let c = derive_root_keys("wrong horse", &params).unwrap();
        assert_ne!(a.master_key(), c.master_key());
    }

    #[test]
    fn derive_refuses_low_cost() {
        let params = AuthParams::v003("user@example.com", 5_000, "nonce");
        assert!(matches!(
            derive_root_keys("pw", &params),
            Err(ProtocolError::CostTooLow { .. })
        ));
    }

    #[test]
    fn v002_uses_server_salt() {
        let params = AuthParams::v002("user@example.com", 3_000, "served-salt");
        let keys = derive_root_keys("pw", &params).unwrap();

        // Same derivation by hand.
        let derived = pbkdf2_sha512(b"pw", b"served-salt", 3_000, DERIVED_LEN);
        let expected = RootKeySet::from_derived(&derived).unwrap();
        assert_eq!(keys.master_key(), expected.master_key());
    }
}
