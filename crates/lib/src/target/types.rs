//! Generic target record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A reference to an ancestor target and its fingerprint at declaration time.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependsOn {
  pub key: String,
  pub hash: String,
}

/// Source files omitted from the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludeFromHash {
  #[serde(default)]
  pub source_files: Vec<String>,
}

/// The canonical input to the engine.
///
/// Produced by a configuration front-end and inserted through the store.
/// Records are never mutated after insert; re-inserting the same key
/// replaces the stored record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
  pub name: String,
  #[serde(rename = "type")]
  pub kind: String,
  /// Absolute path of the declaring file.
  pub file: String,
  /// Absolute path of the workspace root.
  pub realm: String,
  #[serde(default)]
  pub attributes: Map<String, Value>,
  #[serde(default)]
  pub source_files: Vec<String>,
  #[serde(default)]
  pub labels: Vec<String>,
  #[serde(default)]
  pub depends_on: Vec<DependsOn>,
  #[serde(default)]
  pub exclude_from_hash: ExcludeFromHash,
  #[serde(default)]
  pub ignore_file_not_exists_error: bool,
}
