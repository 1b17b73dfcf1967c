//! Artifacts and the two-tier cache.
//!
//! An [`Artifact`] is the record produced by resolving a target against its
//! fingerprint. The local tier is a directory per `(name, hash)` under
//! `<home>/ark/artifacts`, marked populated by an `artifact.json` state
//! file. The remote tier is a [`blob::BlobStore`] holding one gzipped tar of
//! that directory per hash.
//!
//! Type-specific artifacts (container images, package sets) override the
//! probes and transfers in [`crate::targets`]; everything here is the
//! generic content-addressed behaviour.

pub mod blob;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::ARTIFACT_STATE_FILE;
use crate::platform::paths::artifacts_dir;
use crate::target::{DependsOn, parse_key};
use crate::util::archive::{self, ArchiveError};

pub use blob::{BlobError, BlobStore};

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("cache {op} failed for {path}: {source}")]
  CacheIo {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid artifact state in {path}: {source}")]
  State {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("remote cache {op} failed for {key}: {message}")]
  RemoteCache { op: &'static str, key: String, message: String },

  #[error(transparent)]
  Archive(#[from] ArchiveError),
}

impl ArtifactError {
  fn remote(op: &'static str, key: &str, message: impl ToString) -> Self {
    ArtifactError::RemoteCache {
      op,
      key: key.to_string(),
      message: message.to_string(),
    }
  }
}

/// Where produced artifacts are cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
  /// Anchors the local tier at `<home>/ark/artifacts`.
  pub home: PathBuf,
  /// Remote tier base URL; empty disables remote transfers.
  pub remote_url: String,
}

impl CacheConfig {
  pub fn new(home: impl Into<PathBuf>, remote_url: impl Into<String>) -> Self {
    Self {
      home: home.into(),
      remote_url: remote_url.into(),
    }
  }
}

/// The record produced for a target at a given fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
  pub key: String,
  pub hash: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub attributes: Map<String, Value>,
  #[serde(default)]
  pub depends_on: Vec<DependsOn>,
  #[serde(rename = "remote_cache_base_url", default)]
  pub remote_cache_base_url: String,
}

impl Artifact {
  /// Name part of the owning target's key.
  pub fn name(&self) -> String {
    parse_key(&self.key)
      .map(|k| k.name)
      .unwrap_or_else(|_| self.key.clone())
  }

  /// `<home>/ark/artifacts/<name>/<hash>`.
  pub fn cache_dir(&self, home: &Path) -> PathBuf {
    artifacts_dir(home).join(self.name()).join(&self.hash)
  }

  pub fn state_path(&self, home: &Path) -> PathBuf {
    self.cache_dir(home).join(ARTIFACT_STATE_FILE)
  }

  /// Blob key in the remote store.
  pub fn remote_key(&self) -> String {
    format!("{}.tar.gz", self.hash)
  }

  pub fn mk_cache_dir(&self, home: &Path) -> Result<PathBuf, ArtifactError> {
    let dir = self.cache_dir(home);
    fs::create_dir_all(&dir).map_err(|source| ArtifactError::CacheIo {
      op: "mkdir",
      path: dir.clone(),
      source,
    })?;
    Ok(dir)
  }

  /// Write `artifact.json` into the cache directory.
  ///
  /// Uses atomic write (write to temp, then rename) so a crashed build never
  /// leaves a half-written marker that would read as a cache hit.
  pub fn write_state(&self, home: &Path) -> Result<(), ArtifactError> {
    let dir = self.mk_cache_dir(home)?;
    let path = dir.join(ARTIFACT_STATE_FILE);
    let temp_path = dir.join(format!("{ARTIFACT_STATE_FILE}.tmp"));

    let content = serde_json::to_string_pretty(self).map_err(|source| ArtifactError::State {
      path: path.clone(),
      source,
    })?;
    fs::write(&temp_path, content).map_err(|source| ArtifactError::CacheIo {
      op: "write",
      path: temp_path.clone(),
      source,
    })?;
    fs::rename(&temp_path, &path).map_err(|source| ArtifactError::CacheIo {
      op: "rename",
      path: path.clone(),
      source,
    })?;

    debug!(path = %path.display(), "wrote artifact state");
    Ok(())
  }

  /// Read an `artifact.json` written by [`Artifact::write_state`].
  pub fn read_state(path: &Path) -> Result<Artifact, ArtifactError> {
    let content = fs::read_to_string(path).map_err(|source| ArtifactError::CacheIo {
      op: "read",
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ArtifactError::State {
      path: path.to_path_buf(),
      source,
    })
  }

  /// True iff the state marker exists in the expected cache directory.
  pub fn locally_cached(&self, home: &Path) -> bool {
    self.state_path(home).is_file()
  }

  fn blob_store(&self, op: &'static str) -> Result<Box<dyn BlobStore>, ArtifactError> {
    if self.remote_cache_base_url.is_empty() {
      return Err(ArtifactError::remote(op, &self.remote_key(), "no remote cache url configured"));
    }
    blob::open(&self.remote_cache_base_url).map_err(|e| ArtifactError::remote(op, &self.remote_key(), e))
  }

  pub async fn remotely_cached(&self) -> Result<bool, ArtifactError> {
    let key = self.remote_key();
    self
      .blob_store("exists")?
      .exists(&key)
      .await
      .map_err(|e| ArtifactError::remote("exists", &key, e))
  }

  /// Upload a gzipped tar of the cache directory.
  pub async fn push(&self, home: &Path) -> Result<(), ArtifactError> {
    let store = self.blob_store("push")?;
    let dir = self.cache_dir(home);
    let key = self.remote_key();

    let bytes = tokio::task::spawn_blocking(move || archive::gzip_tar_dir(&dir))
      .await
      .map_err(|e| ArtifactError::remote("push", &key, e))??;

    info!(key = %key, size = bytes.len(), "pushing artifact");
    store
      .put(&key, bytes)
      .await
      .map_err(|e| ArtifactError::remote("push", &key, e))
  }

  /// Download the blob and unpack it into a fresh cache directory.
  pub async fn pull(&self, home: &Path) -> Result<(), ArtifactError> {
    let store = self.blob_store("pull")?;
    let key = self.remote_key();
    let bytes = store
      .get(&key)
      .await
      .map_err(|e| ArtifactError::remote("pull", &key, e))?;

    let dir = self.mk_cache_dir(home)?;
    info!(key = %key, dir = %dir.display(), "pulling artifact");
    tokio::task::spawn_blocking(move || archive::gzip_untar(bytes.as_slice(), &dir))
      .await
      .map_err(|e| ArtifactError::remote("pull", &key, e))??;
    Ok(())
  }
}
