//! Test fixtures shared by unit tests across the crate.

use std::path::Path;

use serde_json::{Map, Value};

use crate::target::{DependsOn, Target};

/// A minimal target rooted at `realm`, declared in `<realm>/BUILD.hcl`.
pub fn target(realm: &Path, name: &str, kind: &str) -> Target {
  Target {
    name: name.to_string(),
    kind: kind.to_string(),
    file: realm.join("BUILD.hcl").to_string_lossy().into_owned(),
    realm: realm.to_string_lossy().into_owned(),
    ..Default::default()
  }
}

/// Same as [`target`] with attributes decoded from a JSON object literal.
pub fn target_with_attrs(realm: &Path, name: &str, kind: &str, attrs: Value) -> Target {
  let mut t = target(realm, name, kind);
  t.attributes = match attrs {
    Value::Object(map) => map,
    _ => Map::new(),
  };
  t
}

pub fn depends_on(key: &str, hash: &str) -> DependsOn {
  DependsOn {
    key: key.to_string(),
    hash: hash.to_string(),
  }
}

/// Writes `contents` to `dir/rel`, creating parents.
pub fn write_file(dir: &Path, rel: &str, contents: &str) -> std::path::PathBuf {
  let path = dir.join(rel);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(&path, contents).unwrap();
  path
}
