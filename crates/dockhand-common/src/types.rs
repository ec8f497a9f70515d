//! Domain primitive types used across the Dockhand workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::SHA256_HEX_LENGTH;
use crate::error::{DockhandError, Result};

/// SHA-256 content digest, rendered as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Creates a digest from a bare hex-encoded SHA-256 value.
    ///
    /// Uppercase hex is folded to lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != SHA256_HEX_LENGTH || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DockhandError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Returns the hex-encoded hash without the algorithm prefix.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form suitable for tables (first 12 hex chars).
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for Digest {
    type Err = DockhandError;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix("sha256:").ok_or_else(|| DockhandError::Config {
            message: format!("unsupported digest algorithm: {s}"),
        })?;
        Self::from_hex(hex)
    }
}

impl TryFrom<String> for Digest {
    type Error = DockhandError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parse_prefixed_digest() {
        let digest: Digest = format!("sha256:{HEX}").parse().expect("parse");
        assert_eq!(digest.as_hex(), HEX);
        assert_eq!(digest.to_string(), format!("sha256:{HEX}"));
    }

    #[test]
    fn uppercase_hex_is_normalized() {
        let digest = Digest::from_hex(HEX.to_ascii_uppercase()).expect("from_hex");
        assert_eq!(digest.as_hex(), HEX);
    }

    #[test]
    fn reject_other_algorithms() {
        assert!(format!("sha512:{HEX}").parse::<Digest>().is_err());
        assert!(HEX.parse::<Digest>().is_err());
    }

    #[test]
    fn reject_short_hex() {
        assert!(Digest::from_hex("abc123").is_err());
    }

    #[test]
    fn short_form_has_twelve_chars() {
        let digest = Digest::from_hex(HEX).expect("from_hex");
        assert_eq!(digest.short(), "e3b0c44298fc");
    }

    #[test]
    fn serde_uses_prefixed_string() {
        let digest = Digest::from_hex(HEX).expect("from_hex");
        let json = serde_json::to_string(&digest).expect("serialize");
        assert_eq!(json, format!("\"sha256:{HEX}\""));
        let back: Digest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, digest);
    }
}
