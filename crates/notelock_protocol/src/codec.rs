//! Item payload encryption and decryption.
//!
//! Two layers share the same envelope scheme: item content is encrypted
//! under the per-item key pair, and the per-item key itself is wrapped
//! under the master keys into `enc_item_key`.

use crate::auth_params::AuthParams;
use crate::envelope::Envelope;
use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::RawItem;
use crate::version::ProtocolVersion;
use notelock_crypto::{
    aes256_cbc_decrypt, aes256_cbc_encrypt, base64_decode, base64_encode, hex_decode, hmac_sha256,
    verify_hmac_sha256, CryptoProvider, ItemKeySet, RootKeySet, IV_SIZE,
};
use serde_json::Value;
use uuid::Uuid;

/// Size of the random per-item key before splitting (512 bits).
const ITEM_KEY_SIZE: usize = 64;

/// The encrypted fields produced for an item.
#[derive(Debug, Clone)]
pub struct EncryptedItemContent {
    /// The content envelope string.
    pub content: String,
    /// The wrapped per-item key envelope string.
    pub enc_item_key: String,
}

/// Wraps a JSON payload into an unencrypted `000` envelope.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn plaintext_envelope(content: &Value) -> ProtocolResult<Envelope> {
    let json = serde_json::to_string(content)?;
    Ok(Envelope::Plaintext {
        payload: base64_encode(json.as_bytes()),
    })
}

/// Encrypts a plaintext into an envelope for the given version.
///
/// # Errors
///
/// Returns `ReadOnlyVersion` for `001`; crypto failures otherwise.
pub fn encrypt_to_envelope(
    plaintext: &[u8],
    uuid: Uuid,
    ek: &[u8],
    ak: &[u8],
    version: ProtocolVersion,
    auth_params: &AuthParams,
    provider: &dyn CryptoProvider,
) -> ProtocolResult<Envelope> {
    if !version.can_encrypt() {
        return Err(ProtocolError::ReadOnlyVersion(version.to_string()));
    }

    let iv_bytes = provider.random_bytes(IV_SIZE);
    let iv = hex::encode(&iv_bytes);
    let ciphertext = base64_encode(&aes256_cbc_encrypt(plaintext, ek, &iv_bytes)?);

    let string_to_auth = format!("{version}:{uuid}:{iv}:{ciphertext}");
    let auth_hash = hex::encode(hmac_sha256(string_to_auth.as_bytes(), ak));

    let params_json = serde_json::to_string(&auth_params.embedded())?;
    let auth_params_b64 = base64_encode(params_json.as_bytes());

    Ok(match version {
        ProtocolVersion::V002 => Envelope::V002 {
            auth_hash,
            uuid,
            iv,
            ciphertext,
            auth_params: auth_params_b64,
        },
        ProtocolVersion::V003 => Envelope::V003 {
            auth_hash,
            uuid,
            iv,
            ciphertext,
            auth_params: auth_params_b64,
        },
        ProtocolVersion::V001 => unreachable!("rejected above"),
    })
}

/// Decrypts an envelope, authenticating it first.
///
/// For `001` envelopes the auth hash lives at the item's top level;
/// pass it as `legacy_auth_hash`. When `None`, the `001` ciphertext is
/// decrypted without verification (the wrapped item key has no hash of
/// its own); content decryption enforces presence separately.
///
/// # Errors
///
/// `AuthenticationFailed` on MAC or embedded-UUID mismatch; `Malformed`
/// on undecodable fields.
pub fn decrypt_envelope(
    envelope: &Envelope,
    expected_uuid: Uuid,
    ek: &[u8],
    ak: &[u8],
    legacy_auth_hash: Option<&str>,
) -> ProtocolResult<Vec<u8>> {
    match envelope {
        Envelope::Plaintext { payload } => {
            base64_decode(payload).map_err(|e| ProtocolError::malformed(e.to_string()))
        }
        Envelope::V001 { ciphertext } => {
            if let Some(hash) = legacy_auth_hash {
                let expected = hex_decode(hash)
                    .map_err(|_| ProtocolError::auth_failed("undecodable auth hash"))?;
                let wire = envelope.to_string();
                verify_hmac_sha256(wire.as_bytes(), ak, &expected)
                    .map_err(|_| ProtocolError::auth_failed("auth hash mismatch"))?;
            }
            let ct = base64_decode(ciphertext)
                .map_err(|e| ProtocolError::malformed(e.to_string()))?;
            Ok(aes256_cbc_decrypt(&ct, ek, &[0u8; IV_SIZE])?)
        }
        Envelope::V002 {
            auth_hash,
            uuid,
            iv,
            ciphertext,
            ..
        }
        | Envelope::V003 {
            auth_hash,
            uuid,
            iv,
            ciphertext,
            ..
        } => {
            if *uuid != expected_uuid {
                return Err(ProtocolError::auth_failed(format!(
                    "envelope uuid {uuid} does not match item uuid {expected_uuid}"
                )));
            }
            let version = envelope.version().expect("sealed envelope has a version");
            let string_to_auth = format!("{version}:{uuid}:{iv}:{ciphertext}");
            let expected = hex_decode(auth_hash)
                .map_err(|_| ProtocolError::auth_failed("undecodable auth hash"))?;
            verify_hmac_sha256(string_to_auth.as_bytes(), ak, &expected)
                .map_err(|_| ProtocolError::auth_failed("auth hash mismatch"))?;

            let iv_bytes =
                hex_decode(iv).map_err(|e| ProtocolError::malformed(e.to_string()))?;
            let ct = base64_decode(ciphertext)
                .map_err(|e| ProtocolError::malformed(e.to_string()))?;
            Ok(aes256_cbc_decrypt(&ct, ek, &iv_bytes)?)
        }
    }
}

/// Encrypts an item's content JSON with a fresh per-item key, and wraps
/// that key under the master keys.
///
/// # Errors
///
/// Returns `ReadOnlyVersion` for `001`; crypto failures otherwise.
pub fn encrypt_item_content(
    uuid: Uuid,
    content: &Value,
    keys: &RootKeySet,
    version: ProtocolVersion,
    auth_params: &AuthParams,
    provider: &dyn CryptoProvider,
) -> ProtocolResult<EncryptedItemContent> {
    let item_key_bytes = provider.random_bytes(ITEM_KEY_SIZE);
    let item_keys = ItemKeySet::from_item_key(&item_key_bytes)?;

    let content_json = serde_json::to_string(content)?;
    let content_envelope = encrypt_to_envelope(
        content_json.as_bytes(),
        uuid,
        item_keys.encryption_key(),
        item_keys.auth_key(),
        version,
        auth_params,
        provider,
    )?;

    let key_envelope = encrypt_to_envelope(
        item_keys.to_hex().as_bytes(),
        uuid,
        keys.master_key(),
        keys.auth_key(),
        version,
        auth_params,
        provider,
    )?;

    Ok(EncryptedItemContent {
        content: content_envelope.to_string(),
        enc_item_key: key_envelope.to_string(),
    })
}

/// Decrypts an item record into its content JSON.
///
/// Plaintext (`000`) records decrypt without keys. On any failure the
/// caller is expected to mark the item error-decrypting and preserve the
/// ciphertext verbatim.
///
/// # Errors
///
/// `AuthenticationFailed`, `MalformedEnvelope`, `MissingItemKey`, or an
/// underlying crypto/JSON failure.
pub fn decrypt_item_content(raw: &RawItem, keys: &RootKeySet) -> ProtocolResult<Value> {
    let content = raw
        .content
        .as_deref()
        .ok_or_else(|| ProtocolError::malformed("record has no content"))?;
    let envelope = Envelope::parse(content)?;

    if let Envelope::Plaintext { payload } = &envelope {
        let json = base64_decode(payload).map_err(|e| ProtocolError::malformed(e.to_string()))?;
        return Ok(serde_json::from_slice(&json)?);
    }

    let enc_item_key = raw.enc_item_key.as_deref().ok_or(ProtocolError::MissingItemKey)?;
    let key_envelope = Envelope::parse(enc_item_key)?;
    let item_key_bytes = decrypt_envelope(
        &key_envelope,
        raw.uuid,
        keys.master_key(),
        keys.auth_key(),
        None,
    )?;
    let item_key_hex = String::from_utf8(item_key_bytes)
        .map_err(|_| ProtocolError::malformed("item key is not utf-8 hex"))?;
    let item_keys = ItemKeySet::from_hex(item_key_hex.trim())?;

    if matches!(envelope, Envelope::V001 { .. }) && raw.auth_hash.is_none() {
        return Err(ProtocolError::auth_failed("001 record carries no auth hash"));
    }

    let plaintext = decrypt_envelope(
        &envelope,
        raw.uuid,
        item_keys.encryption_key(),
        item_keys.auth_key(),
        raw.auth_hash.as_deref(),
    )?;
    Ok(serde_json::from_slice(&plaintext)?)
}
