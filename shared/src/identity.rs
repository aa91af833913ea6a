use sha2::{Digest, Sha256};
use std::fmt;

use crate::WORLD_HASH_LEN;

/// SHA-256 digest of the whole configuration file.
///
/// Any byte-level change to the file, including comments and unrelated keys,
/// produces a different fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvFingerprint(String);

impl EnvFingerprint {
    pub fn of(contents: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(contents)))
    }

    /// Parses the content of a marker file. Surrounding whitespace is ignored
    /// and an empty marker counts as absent.
    pub fn from_marker(contents: &str) -> Option<Self> {
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The five settings that define which world a server runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldIdentity {
    pub server_name: String,
    pub level_name: String,
    pub seed: String,
    pub game_mode: String,
    pub difficulty: String,
}

impl WorldIdentity {
    pub fn hash(&self) -> WorldHash {
        let mut hasher = Sha256::new();
        hasher.update(self.server_name.as_bytes());
        hasher.update(self.level_name.as_bytes());
        hasher.update(self.seed.as_bytes());
        hasher.update(self.game_mode.as_bytes());
        hasher.update(self.difficulty.as_bytes());

        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(WORLD_HASH_LEN);
        WorldHash(digest)
    }

    pub fn has_seed(&self) -> bool {
        !self.seed.trim().is_empty()
    }
}

/// Short hex tag that ties backups to a [`WorldIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorldHash(String);

impl WorldHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
