//! Observed file records.

use std::fs::Metadata;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ObserverError;
use crate::util::hash::sha1_file;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
  #[default]
  #[serde(rename = "f")]
  File,
  #[serde(rename = "d")]
  Dir,
  #[serde(rename = "l")]
  Symlink,
}

/// One file as seen by an observer backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
  /// Absolute path.
  pub name: String,
  /// Path relative to the observed root.
  pub rel_name: String,
  pub exists: bool,
  pub new: bool,
  #[serde(rename = "type")]
  pub kind: FileType,
  /// Hex SHA-1 of the content; empty for anything but regular files.
  pub hash: String,
  #[serde(default)]
  pub symlink_target: String,
}

/// `path` relative to `root`, without a leading separator.
pub fn rel_name(root: &Path, path: &Path) -> String {
  let rel = path.strip_prefix(root).unwrap_or(path).to_string_lossy();
  rel.trim_start_matches(['/', '\\']).to_string()
}

impl FileRecord {
  /// Stat and hash `path`. Symlinks are not followed for the type, but their
  /// target is resolved.
  pub fn from_path(root: &Path, path: &Path) -> Result<Self, ObserverError> {
    let meta = std::fs::symlink_metadata(path).map_err(ObserverError::io(path))?;
    Self::from_metadata(root, path, &meta)
  }

  pub fn from_metadata(root: &Path, path: &Path, meta: &Metadata) -> Result<Self, ObserverError> {
    let mut record = FileRecord {
      name: path.to_string_lossy().into_owned(),
      rel_name: rel_name(root, path),
      exists: true,
      ..Default::default()
    };

    let file_type = meta.file_type();
    if file_type.is_dir() {
      record.kind = FileType::Dir;
    } else if file_type.is_symlink() {
      record.kind = FileType::Symlink;
      let target = dunce::canonicalize(path).map_err(ObserverError::io(path))?;
      record.symlink_target = target.to_string_lossy().into_owned();
    } else if file_type.is_file() {
      record.hash = sha1_file(path).map_err(|e| ObserverError::Io {
        path: path.to_path_buf(),
        source: e.source,
      })?;
    }
    Ok(record)
  }

  /// A deletion of `path`.
  pub fn deleted(root: &Path, path: &Path) -> Self {
    FileRecord {
      name: path.to_string_lossy().into_owned(),
      rel_name: rel_name(root, path),
      exists: false,
      ..Default::default()
    }
  }

  pub fn is_dir(&self) -> bool {
    self.kind == FileType::Dir
  }

  pub fn is_regular(&self) -> bool {
    self.kind == FileType::File
  }
}
