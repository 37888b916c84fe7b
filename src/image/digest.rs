use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use super::ImageError;

/// Content-addressable digest in `algorithm:hash` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hash: String,
}

impl Digest {
    /// Parse a digest string in format "algorithm:hash"
    pub fn parse(digest: &str) -> Result<Self, ImageError> {
        let (algorithm, hash) = digest
            .split_once(':')
            .ok_or_else(|| ImageError::InvalidDigest(digest.to_string()))?;

        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
        let hash_ok = !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit());

        if !algorithm_ok || !hash_ok {
            return Err(ImageError::InvalidDigest(digest.to_string()));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_ascii_lowercase(),
        })
    }

    /// sha256 digest of the given bytes
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hash: hex::encode(Sha256::digest(bytes)),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// First 12 hex characters, the way image ids are usually shown
    pub fn short(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }

    /// Blob location inside an OCI image layout
    pub fn to_blob_path(&self, layout_dir: &Path) -> PathBuf {
        layout_dir
            .join("blobs")
            .join(&self.algorithm)
            .join(&self.hash)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

impl TryFrom<String> for Digest {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}
