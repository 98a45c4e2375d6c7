//! Key derivation parameters.

use crate::error::{ProtocolError, ProtocolResult};
use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};

/// The parameters needed to reconstruct a user's key hierarchy.
///
/// These travel with the account (from the auth endpoint) and, in
/// compact form, inside every ciphertext envelope so a decryptor can
/// verify provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    /// Protocol version the account operates at.
    pub version: ProtocolVersion,
    /// Account identifier (email).
    pub identifier: String,
    /// PBKDF2 iteration count.
    pub pw_cost: u32,
    /// Server-supplied salt (versions `001`/`002`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pw_salt: Option<String>,
    /// Server-supplied nonce the client salts with (version `003`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pw_nonce: Option<String>,
}

impl AuthParams {
    /// Creates version-`003` parameters.
    pub fn v003(identifier: impl Into<String>, pw_cost: u32, pw_nonce: impl Into<String>) -> Self {
        Self {
            version: ProtocolVersion::V003,
            identifier: identifier.into(),
            pw_cost,
            pw_salt: None,
            pw_nonce: Some(pw_nonce.into()),
        }
    }

    /// Creates version-`002` parameters with a server salt.
    pub fn v002(identifier: impl Into<String>, pw_cost: u32, pw_salt: impl Into<String>) -> Self {
        Self {
            version: ProtocolVersion::V002,
            identifier: identifier.into(),
            pw_cost,
            pw_salt: Some(pw_salt.into()),
            pw_nonce: None,
        }
    }

    /// Validates the parameters for their version.
    ///
    /// # Errors
    ///
    /// Returns `CostTooLow` below the version minimum and
    /// `MissingParameter` when the salt or nonce the version needs is
    /// absent. Refusing here is what blocks a login downgraded below the
    /// cost floor.
    pub fn validate(&self) -> ProtocolResult<()> {
        let minimum = self.version.min_pbkdf2_cost();
        if self.pw_cost < minimum {
            return Err(ProtocolError::CostTooLow {
                cost: self.pw_cost,
                minimum,
                version: self.version.to_string(),
            });
        }
        match self.version {
            ProtocolVersion::V003 => {
                if self.pw_nonce.is_none() {
                    return Err(ProtocolError::MissingParameter("pw_nonce"));
                }
            }
            ProtocolVersion::V001 | ProtocolVersion::V002 => {
                if self.pw_salt.is_none() {
                    return Err(ProtocolError::MissingParameter("pw_salt"));
                }
            }
        }
        Ok(())
    }

    /// The compact form embedded in envelopes: version, cost, nonce and
    /// identifier, without the salt (which is derivable).
    #[must_use]
    pub fn embedded(&self) -> AuthParams {
        AuthParams {
            version: self.version,
            identifier: self.identifier.clone(),
            pw_cost: self.pw_cost,
            pw_salt: None,
            pw_nonce: self.pw_nonce.clone(),
        }
    }
}
