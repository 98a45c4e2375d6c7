//! Protocol versions.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A supported encryption protocol version.
///
/// `001` is read-only in modern clients: items encrypted with it can
/// still be decrypted, but all writes use the latest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy format, zero IV, top-level auth hash.
    #[serde(rename = "001")]
    V001,
    /// Server-supplied salt, enveloped auth hash.
    #[serde(rename = "002")]
    V002,
    /// Client-computed salt from a server nonce.
    #[serde(rename = "003")]
    V003,
}

impl ProtocolVersion {
    /// The newest version; all fresh encryption uses this.
    pub const LATEST: Self = Self::V003;

    /// The three-character wire prefix.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V001 => "001",
            Self::V002 => "002",
            Self::V003 => "003",
        }
    }

    /// Parses a three-character version prefix.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedVersion` for a numeric version newer than this
    /// library, and `MalformedEnvelope` for anything else.
    pub fn from_prefix(prefix: &str) -> ProtocolResult<Self> {
        match prefix {
            "001" => Ok(Self::V001),
            "002" => Ok(Self::V002),
            "003" => Ok(Self::V003),
            other if other.len() == 3 && other.chars().all(|c| c.is_ascii_digit()) => {
                Err(ProtocolError::UnsupportedVersion(other.to_string()))
            }
            other => Err(ProtocolError::malformed(format!(
                "unrecognized version prefix {other:?}"
            ))),
        }
    }

    /// Minimum acceptable PBKDF2 iteration count for this version.
    #[must_use]
    pub fn min_pbkdf2_cost(&self) -> u32 {
        match self {
            Self::V001 | Self::V002 => 3_000,
            Self::V003 => 110_000,
        }
    }

    /// Whether new content may be encrypted with this version.
    #[must_use]
    pub fn can_encrypt(&self) -> bool {
        !matches!(self, Self::V001)
    }

    /// Whether a login against this version should warn the user.
    #[must_use]
    pub fn is_outdated(&self) -> bool {
        *self < Self::LATEST
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_roundtrip() {
        for v in [
            ProtocolVersion::V001,
            ProtocolVersion::V002,
            ProtocolVersion::V003,
        ] {
            assert_eq!(ProtocolVersion::from_prefix(v.as_str()).unwrap(), v);
        }
    }

    #[test]
    fn newer_version_is_terminal() {
        assert!(matches!(
            ProtocolVersion::from_prefix("004"),
            Err(ProtocolError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            ProtocolVersion::from_prefix("xyz"),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn cost_minimums() {
        assert_eq!(ProtocolVersion::V001.min_pbkdf2_cost(), 3_000);
        assert_eq!(ProtocolVersion::V002.min_pbkdf2_cost(), 3_000);
        assert_eq!(ProtocolVersion::V003.min_pbkdf2_cost(), 110_000);
    }

    #[test]
    fn v001_is_read_only() {
        assert!(!ProtocolVersion::V001.can_encrypt());
        assert!(ProtocolVersion::V003.can_encrypt());
        assert!(ProtocolVersion::V001.is_outdated());
        assert!(!ProtocolVersion::V003.is_outdated());
    }

    #[test]
    fn serde_uses_wire_strings() {
        let json = serde_json::to_string(&ProtocolVersion::V003).unwrap();
        assert_eq!(json, "\"003\"");
        let back: ProtocolVersion = serde_json::from_str("\"002\"").unwrap();
        assert_eq!(back, ProtocolVersion::V002);
    }
}
