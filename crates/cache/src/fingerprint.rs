//! Fixed-length cache keys.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// SHA-256 digest identifying a target under one exact set of inputs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse raw bytes received over the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFingerprint`] if the slice is not 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; FINGERPRINT_LEN] =
            bytes.try_into().map_err(|_| Error::InvalidFingerprint {
                value: hex::encode(bytes),
                reason: format!("expected {FINGERPRINT_LEN} bytes, got {}", bytes.len()),
            })?;
        Ok(Self(array))
    }

    /// Parse a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFingerprint`] for anything else.
    pub fn from_hex(value: &str) -> Result<Self> {
        if value.len() != FINGERPRINT_LEN * 2 {
            return Err(Error::InvalidFingerprint {
                value: value.to_string(),
                reason: format!("expected {} hex characters", FINGERPRINT_LEN * 2),
            });
        }
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(value, &mut bytes).map_err(|e| Error::InvalidFingerprint {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// SHA-256 of `data`.
    #[must_use]
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(data.as_ref());
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Sharded location of this fingerprint under `root`:
    /// `{root}/{hex[0..2]}/{hex[2..4]}/{hex}`.
    #[must_use]
    pub fn shard_path(&self, root: &Path) -> PathBuf {
        let hex = self.to_hex();
        root.join(&hex[..2]).join(&hex[2..4]).join(hex)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let fp = Fingerprint::digest(b"hello");
        assert_eq!(
            fp.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(Fingerprint::from_hex("abc").is_err());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_err());
        assert!(Fingerprint::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn shard_path_layout() {
        let fp = Fingerprint::digest(b"hello");
        let path = fp.shard_path(Path::new("/cache"));
        assert_eq!(
            path,
            Path::new("/cache/2c/f2/2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn debug_is_abbreviated() {
        let fp = Fingerprint::digest(b"hello");
        assert_eq!(format!("{fp:?}"), "Fingerprint(2cf24dba5fb0)");
    }
}
