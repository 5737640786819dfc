//! Storage identifiers.

use std::fmt;
use std::str::FromStr;

use naptha_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SHA256_PREFIX: &str = "sha256:";

/// Id of a stored object: `sha256:<hex>` when content addressed, otherwise
/// whatever the node assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(String);

impl StorageId {
    /// Content address of `data`.
    pub fn for_content(data: &[u8]) -> Self {
        Self(format!("{}{}", SHA256_PREFIX, hex::encode(Sha256::digest(data))))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidInput("empty storage id".into()));
        }
        if let Some(digest) = s.strip_prefix(SHA256_PREFIX) {
            let valid = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(Error::InvalidInput(format!("malformed content address: {}", s)));
            }
            return Ok(Self(format!("{}{}", SHA256_PREFIX, digest.to_ascii_lowercase())));
        }
        if s.contains('/') {
            return Err(Error::InvalidInput(format!("storage id may not contain '/': {}", s)));
        }
        Ok(Self(s.to_string()))
    }

    /// Hex digest for content-addressed ids.
    pub fn digest(&self) -> Option<&str> {
        self.0.strip_prefix(SHA256_PREFIX)
    }

    pub fn is_content_addressed(&self) -> bool {
        self.digest().is_some()
    }

    /// Whether `data` hashes to this id. Node-assigned ids always match.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self.digest() {
            Some(expected) => hex::encode(Sha256::digest(data)) == expected,
            None => true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id usable as a file name.
    pub fn file_stem(&self) -> String {
        self.0.replace(':', "_")
    }
}

impl FromStr for StorageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
