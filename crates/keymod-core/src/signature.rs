//! Key signatures: the hex fingerprints that name keys in mount options and keyrings.

use crate::error::{KeymodError, KeymodResult};
use std::fmt;

/// Raw digest length of a key signature.
pub const SIG_SIZE: usize = 20;
/// Hex-encoded signature length.
pub const SIG_SIZE_HEX: usize = SIG_SIZE * 2;
/// Mount option naming the key a mount should use.
pub const SIG_MOUNT_OPTION: &str = "ecryptfs_sig";

/// Lowercase hex fingerprint of a key (always [`SIG_SIZE_HEX`] characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeySignature(String);

impl KeySignature {
    /// Encode a raw digest.
    pub fn from_digest(digest: &[u8; SIG_SIZE]) -> Self {
        Self(hex::encode(digest))
    }

    /// Accept an already-encoded signature, normalising to lowercase.
    pub fn parse(value: &str) -> KeymodResult<Self> {
        let trimmed = value.trim();
        if trimmed.len() != SIG_SIZE_HEX || !trimmed.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(KeymodError::Configuration(format!(
                "key signature must be {SIG_SIZE_HEX} hex characters (got [{trimmed}])"
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `ecryptfs_sig=<sig>`
    pub fn mount_option(&self) -> String {
        format!("{SIG_MOUNT_OPTION}={}", self.0)
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
