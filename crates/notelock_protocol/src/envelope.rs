//! The ciphertext envelope.
//!
//! Wire form for `002`/`003` is six colon-separated fields:
//!
//! ```text
//! <version>:<auth_hash_hex>:<uuid>:<iv_hex>:<content_b64>:<auth_params_b64>
//! ```
//!
//! `001` is the version prefix followed directly by base64 ciphertext,
//! and `000` marks an unencrypted base64 JSON payload. Each version gets
//! its own parser and serializer; the layouts only look alike.

use crate::error::{ProtocolError, ProtocolResult};
use crate::version::ProtocolVersion;
use std::fmt;
use uuid::Uuid;

/// Prefix marking an unencrypted base64 JSON payload.
pub(crate) const PLAINTEXT_PREFIX: &str = "000";

/// A parsed ciphertext envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Legacy `001`: bare base64 ciphertext, zero IV, auth hash carried
    /// at the item's top level rather than in the envelope.
    V001 {
        /// Base64 AES-CBC ciphertext.
        ciphertext: String,
    },
    /// `002` envelope.
    V002 {
        /// Hex HMAC-SHA256 over `version:uuid:iv:ciphertext`.
        auth_hash: String,
        /// UUID of the item this envelope belongs to.
        uuid: Uuid,
        /// Hex-encoded 128-bit IV.
        iv: String,
        /// Base64 AES-CBC ciphertext.
        ciphertext: String,
        /// Base64 JSON of the compact auth params.
        auth_params: String,
    },
    /// `003` envelope.
    V003 {
        /// Hex HMAC-SHA256 over `version:uuid:iv:ciphertext`.
        auth_hash: String,
        /// UUID of the item this envelope belongs to.
        uuid: Uuid,
        /// Hex-encoded 128-bit IV.
        iv: String,
        /// Base64 AES-CBC ciphertext.
        ciphertext: String,
        /// Base64 JSON of the compact auth params.
        auth_params: String,
    },
    /// `000`: unencrypted base64 JSON.
    Plaintext {
        /// Base64-encoded JSON payload.
        payload: String,
    },
}

impl Envelope {
    /// Parses a wire string into an envelope.
    ///
    /// # Errors
    ///
    /// `MalformedEnvelope` on a bad shape, `UnsupportedVersion` on a
    /// numeric version newer than this library.
    pub fn parse(input: &str) -> ProtocolResult<Self> {
        if input.len() < 3 {
            return Err(ProtocolError::malformed("envelope shorter than a version"));
        }
        let prefix = &input[..3];
        if prefix == PLAINTEXT_PREFIX {
            return Ok(Self::Plaintext {
                payload: input[3..].to_string(),
            });
        }
        match ProtocolVersion::from_prefix(prefix)? {
            ProtocolVersion::V001 => Self::parse_v001(input),
            ProtocolVersion::V002 => Self::parse_v002(input),
            ProtocolVersion::V003 => Self::parse_v003(input),
        }
    }

    fn parse_v001(input: &str) -> ProtocolResult<Self> {
        // No separators in 001; a colon means the string is not 001.
        let body = &input[3..];
        if body.contains(':') {
            return Err(ProtocolError::malformed("001 envelope contains separators"));
        }
        Ok(Self::V001 {
            ciphertext: body.to_string(),
        })
    }

    fn parse_v002(input: &str) -> ProtocolResult<Self> {
        let (auth_hash, uuid, iv, ciphertext, auth_params) = split_sealed(input, "002")?;
        Ok(Self::V002 {
            auth_hash,
            uuid,
            iv,
            ciphertext,
            auth_params,
        })
    }

    fn parse_v003(input: &str) -> ProtocolResult<Self> {
        let (auth_hash, uuid, iv, ciphertext, auth_params) = split_sealed(input, "003")?;
        Ok(Self::V003 {
            auth_hash,
            uuid,
            iv,
            ciphertext,
            auth_params,
        })
    }

    /// The protocol version, or `None` for a plaintext payload.
    #[must_use]
    pub fn version(&self) -> Option<ProtocolVersion> {
        match self {
            Self::V001 { .. } => Some(ProtocolVersion::V001),
            Self::V002 { .. } => Some(ProtocolVersion::V002),
            Self::V003 { .. } => Some(ProtocolVersion::V003),
            Self::Plaintext { .. } => None,
        }
    }

    /// Whether the payload is stored without encryption.
    #[must_use]
    pub fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext { .. })
    }
}

fn split_sealed(input: &str, version: &str) -> ProtocolResult<(String, Uuid, String, String, String)> {
    let fields: Vec<&str> = input.split(':').collect();
    if fields.len() != 6 {
        return Err(ProtocolError::malformed(format!(
            "expected 6 fields in a {version} envelope, got {}",
            fields.len()
        )));
    }
    let uuid = Uuid::parse_str(fields[2])
        .map_err(|_| ProtocolError::malformed(format!("invalid uuid {:?}", fields[2])))?;
    Ok((
        fields[1].to_string(),
        uuid,
        fields[3].to_string(),
        fields[4].to_string(),
        fields[5].to_string(),
    ))
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V001 { ciphertext } => write!(f, "001{ciphertext}"),
            Self::V002 {
                auth_hash,
                uuid,
                iv,
                ciphertext,
                auth_params,
            } => write!(f, "002:{auth_hash}:{uuid}:{iv}:{ciphertext}:{auth_params}"),
            Self::V003 {
                auth_hash,
                uuid,
                iv,
                ciphertext,
                auth_params,
            } => write!(f, "003:{auth_hash}:{uuid}:{iv}:{ciphertext}:{auth_params}"),
            Self::Plaintext { payload } => write!(f, "000{payload}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid() -> Uuid {
        Uuid::parse_str("6b1c6a36-1b9f-4a22-8b0a-2b4f6f0b9a01").unwrap()
    }

    #[test]
    fn sealed_roundtrip() {
        let env = Envelope::V003 {
            auth_hash: "ab".into(),
            uuid: uuid(),
            iv: "00ff".into(),
            ciphertext: "Y2lwaGVy".into(),
            auth_params: "e30=".into(),
        };
        let wire = env.to_string();
        assert!(wire.starts_with("003:ab:"));
        assert_eq!(Envelope::parse(&wire).unwrap(), env);
    }

    #[test]
    fn v001_roundtrip() {
        let env = Envelope::V001 {
            ciphertext: "Y2lwaGVy".into(),
        };
        let wire = env.to_string();
        assert_eq!(wire, "001Y2lwaGVy");
        assert_eq!(Envelope::parse(&wire).unwrap(), env);
    }

    #[test]
    fn plaintext_roundtrip() {
        let env = Envelope::Plaintext {
            payload: "eyJhIjoxfQ==".into(),
        };
        let wire = env.to_string();
        assert!(wire.starts_with("000"));
        let parsed = Envelope::parse(&wire).unwrap();
        assert!(parsed.is_plaintext());
        assert_eq!(parsed, env);
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let err = Envelope::parse("003:only:three").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn bad_uuid_is_malformed() {
        let err = Envelope::parse("003:hash:not-a-uuid:iv:ct:ap").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn future_version_is_unsupported() {
        let err = Envelope::parse("004:a:b:c:d:e").unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(_)));
    }

    #[test]
    fn tiny_input_is_malformed() {
        assert!(matches!(
            Envelope::parse("00"),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn version_accessor() {
        assert_eq!(
            Envelope::parse("001abc").unwrap().version(),
            Some(ProtocolVersion::V001)
        );
        assert_eq!(Envelope::parse("000abc").unwrap().version(), None);
    }
}
