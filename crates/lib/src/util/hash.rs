//! Content hashing for fingerprints and file indexing.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `hash_file()` / `hash_bytes()`: SHA-256 of a file or byte slice
//! - `sha1_file()` / `sha1_hex()`: SHA-1, used for key hashes and file records
//! - `short_hash()`: the 7-character display form of a fingerprint

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::consts::SHORT_HASH_LEN;

/// A full 64-character SHA-256 hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl ContentHash {
  pub fn short(&self) -> &str {
    short_hash(&self.0)
  }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to read file {path}: {source}")]
pub struct ReadFileError {
  pub path: String,
  #[source]
  pub source: std::io::Error,
}

fn digest_file<D: Digest>(path: &Path) -> Result<String, ReadFileError> {
  let read_err = |source| ReadFileError {
    path: path.display().to_string(),
    source,
  };
  let mut file = fs::File::open(path).map_err(read_err)?;

  let mut hasher = D::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Hash a file's contents with SHA-256.
pub fn hash_file(path: &Path) -> Result<ContentHash, ReadFileError> {
  digest_file::<Sha256>(path).map(ContentHash)
}

/// Hash a file's contents with SHA-1.
///
/// File records in the observer index carry SHA-1 so they line up with the
/// content hashes reported by the external watch daemon.
pub fn sha1_file(path: &Path) -> Result<String, ReadFileError> {
  digest_file::<Sha1>(path)
}

/// Hash arbitrary bytes with SHA-256.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// Hex SHA-1 of a string.
pub fn sha1_hex(data: &str) -> String {
  hex::encode(Sha1::digest(data.as_bytes()))
}

/// First seven characters of a hash. Hashes shorter than eight characters
/// are returned unchanged.
pub fn short_hash(hash: &str) -> &str {
  if hash.len() < SHORT_HASH_LEN + 1 {
    return hash;
  }
  hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}
