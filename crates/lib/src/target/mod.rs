//! The generic target record.
//!
//! A [`Target`] is the engine's canonical unit of work: a name and type,
//! the file that declared it, its workspace root (the *realm*), a
//! type-specific attribute map, source files and ancestor references.
//!
//! This module owns key derivation (`<relative file>:<name>`), source-file
//! normalization, generic validation, and the SHA-256 fingerprint computed
//! in [`checksum`].

mod checksum;
mod key;
mod types;

use std::path::Path;

use thiserror::Error;

pub use key::{TargetKey, parse_key};
pub use types::{DependsOn, ExcludeFromHash, Target};

use crate::util::hash::sha1_hex;

#[derive(Debug, Error)]
pub enum TargetError {
  #[error("invalid target: {field} {reason}")]
  Validation { field: String, reason: String },

  #[error("invalid target key {0:?}: expected <path>:<name>")]
  InvalidKey(String),

  #[error("source file does not exist: {path}")]
  SourceFileMissing { path: String },

  #[error("source file is a directory: {path}")]
  SourceFileIsDirectory { path: String },

  #[error("failed to read {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

impl TargetError {
  pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
    TargetError::Validation {
      field: field.into(),
      reason: reason.into(),
    }
  }
}

impl Target {
  /// `<file relative to realm>:<name>`.
  pub fn key(&self) -> String {
    format!("{}:{}", self.rel_path(&self.file), self.name)
  }

  /// Hex SHA-1 of [`Target::key`], used as a label value on cluster objects.
  pub fn key_hash(&self) -> String {
    sha1_hex(&self.key())
  }

  /// Directory containing the declaring file.
  pub fn dir(&self) -> &str {
    Path::new(&self.file)
      .parent()
      .and_then(|p| p.to_str())
      .unwrap_or_default()
  }

  /// Strips the realm prefix and any leading `/` from `path`.
  pub fn rel_path(&self, path: &str) -> String {
    path
      .strip_prefix(self.realm.as_str())
      .unwrap_or(path)
      .trim_start_matches('/')
      .to_string()
  }

  /// Generic validation shared by every target type.
  pub fn validate(&self) -> Result<(), TargetError> {
    for (field, value) in [
      ("name", &self.name),
      ("type", &self.kind),
      ("file", &self.file),
      ("realm", &self.realm),
    ] {
      if value.is_empty() {
        return Err(TargetError::validation(field, "must not be empty"));
      }
    }
    if self.source_files.iter().any(|f| f.is_empty()) {
      return Err(TargetError::validation("sourceFiles", "entries must not be empty"));
    }
    for dep in &self.depends_on {
      if dep.key.is_empty() {
        return Err(TargetError::validation("dependsOn", "entry has an empty key"));
      }
    }
    Ok(())
  }

  /// Resolve a declared source file to an absolute path.
  ///
  /// - `./x` is relative to the declaring file's directory
  /// - `//x` is relative to the realm
  /// - absolute paths are kept
  /// - anything else is relative to the realm
  pub fn normalize_source_file(&self, file: &str) -> Result<String, TargetError> {
    if file.is_empty() {
      return Err(TargetError::validation("sourceFiles", "entries must not be empty"));
    }
    let joined = if let Some(rest) = file.strip_prefix("./") {
      Path::new(self.dir()).join(rest)
    } else if let Some(rest) = file.strip_prefix("//") {
      Path::new(&self.realm).join(rest)
    } else if Path::new(file).is_absolute() {
      return Ok(file.to_string());
    } else {
      Path::new(&self.realm).join(file)
    };
    Ok(joined.to_string_lossy().into_owned())
  }

  /// Copy of the target with every source file and exclusion resolved to an
  /// absolute path.
  pub fn normalized(&self) -> Result<Target, TargetError> {
    let mut out = self.clone();
    out.source_files = self
      .source_files
      .iter()
      .map(|f| self.normalize_source_file(f))
      .collect::<Result<_, _>>()?;
    out.exclude_from_hash.source_files = self
      .exclude_from_hash
      .source_files
      .iter()
      .map(|f| self.normalize_source_file(f))
      .collect::<Result<_, _>>()?;
    Ok(out)
  }
}
