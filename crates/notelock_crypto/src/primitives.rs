//! Low-level cryptographic primitives.
//!
//! Everything here operates on raw byte slices; key and envelope handling
//! live in the higher layers. AES is always 256-bit CBC with PKCS7
//! padding, MACs are HMAC-SHA256, and key stretching is
//! PBKDF2-HMAC-SHA512.

use crate::error::{CryptoError, CryptoResult};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Size of an AES-CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Size of an AES-256 key in bytes.
const AES_KEY_SIZE: usize = 32;

/// Stretches a password into `out_len` bytes with PBKDF2-HMAC-SHA512.
pub fn pbkdf2_sha512(password: &[u8], salt: &[u8], iterations: u32, out_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_len];
    pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out);
    out
}

/// Encrypts with AES-256-CBC and PKCS7 padding.
///
/// # Errors
///
/// Returns an error if the key is not 32 bytes or the IV is not 16 bytes.
pub fn aes256_cbc_encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> CryptoResult<Vec<u8>> {
    check_key_iv(key, iv)?;
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CryptoError::invalid_key_size(key.len(), AES_KEY_SIZE))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypts AES-256-CBC with PKCS7 padding.
///
/// # Errors
///
/// Returns an error on bad key/IV sizes or invalid padding. Note that a
/// padding error alone does not prove tampering; callers authenticate the
/// ciphertext with [`verify_hmac_sha256`] before decrypting.
pub fn aes256_cbc_decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> CryptoResult<Vec<u8>> {
    check_key_iv(key, iv)?;
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::invalid_key_size(key.len(), AES_KEY_SIZE))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::decryption_failed("bad padding"))
}

fn check_key_iv(key: &[u8], iv: &[u8]) -> CryptoResult<()> {
    if key.len() != AES_KEY_SIZE {
        return Err(CryptoError::invalid_key_size(key.len(), AES_KEY_SIZE));
    }
    if iv.len() != IV_SIZE {
        return Err(CryptoError::invalid_key_size(iv.len(), IV_SIZE));
    }
    Ok(())
}

/// Computes HMAC-SHA256 over `message`.
pub fn hmac_sha256(message: &[u8], key: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Verifies an HMAC-SHA256 tag in constant time.
///
/// # Errors
///
/// Returns [`CryptoError::MacMismatch`] when the tag does not verify.
pub fn verify_hmac_sha256(message: &[u8], key: &[u8], expected: &[u8]) -> CryptoResult<()> {
    let computed = hmac_sha256(message, key);
    if computed.ct_eq(expected).into() {
        Ok(())
    } else {
        Err(CryptoError::MacMismatch)
    }
}

/// SHA-256 of `data`, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Decodes a hex string.
///
/// # Errors
///
/// Returns an error when the input is not valid hex.
pub fn hex_decode(input: &str) -> CryptoResult<Vec<u8>> {
    hex::decode(input).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Encodes bytes as standard base64.
pub fn base64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decodes standard base64.
///
/// # Errors
///
/// Returns an error when the input is not valid base64.
pub fn base64_decode(input: &str) -> CryptoResult<Vec<u8>> {
    BASE64
        .decode(input)
        .map_err(|e| CryptoError::InvalidBase64(e.to_string()))
}

/// Decodes standard base64 into a UTF-8 string.
///
/// # Errors
///
/// Returns an error when the input is not valid base64 or not UTF-8.
pub fn base64_decode_string(input: &str) -> CryptoResult<String> {
    let bytes = base64_decode(input)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::InvalidBase64(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pbkdf2_is_deterministic() {
        let a = pbkdf2_sha512(b"password", b"salt", 1000, 96);
        let b = pbkdf2_sha512(b"password", b"salt", 1000, 96);
        assert_eq!(a, b);
        assert_eq!(a.len(), 96);

        let c = pbkdf2_sha512(b"password", b"other", 1000, 96);
        assert_ne!(a, c);
    }

    #[test]
    fn cbc_roundtrip() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let plaintext = b"attack at dawn";

        let ct = aes256_cbc_encrypt(plaintext, &key, &iv).unwrap();
        assert_ne!(&ct[..], &plaintext[..]);

        let pt = aes256_cbc_decrypt(&ct, &key, &iv).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn cbc_rejects_short_key() {
        let result = aes256_cbc_encrypt(b"data", &[0u8; 16], &[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::InvalidKeySize { .. })));
    }

    #[test]
    fn cbc_wrong_key_fails_or_garbles() {
        let iv = [0u8; 16];
        let ct = aes256_cbc_encrypt(b"some secret content", &[1u8; 32], &iv).unwrap();

        // Wrong key either fails padding or yields different bytes.
        match aes256_cbc_decrypt(&ct, &[2u8; 32], &iv) {
            Ok(pt) => assert_ne!(pt, b"some secret content"),
            Err(e) => assert!(matches!(e, CryptoError::DecryptionFailed { .. })),
        }
    }

    #[test]
    fn hmac_verify() {
        let tag = hmac_sha256(b"message", b"key");
        assert!(verify_hmac_sha256(b"message", b"key", &tag).is_ok());
        assert!(matches!(
            verify_hmac_sha256(b"message!", b"key", &tag),
            Err(CryptoError::MacMismatch)
        ));
        assert!(matches!(
            verify_hmac_sha256(b"message", b"other", &tag),
            Err(CryptoError::MacMismatch)
        ));
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn base64_roundtrip() {
        let encoded = base64_encode(b"hello");
        assert_eq!(encoded, "aGVsbG8=");
        assert_eq!(base64_decode(&encoded).unwrap(), b"hello");
        assert_eq!(base64_decode_string(&encoded).unwrap(), "hello");
        assert!(base64_decode("not*base64").is_err());
    }

    #[test]
    fn hex_decode_errors() {
        assert_eq!(hex_decode("00ff").unwrap(), vec![0x00, 0xff]);
        assert!(hex_decode("zz").is_err());
    }
}
