//! Target fingerprinting.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Target, TargetError};
use crate::util::hash::{ContentHash, hash_file};
use crate::util::structhash::{StructHasher, hash_bool, hash_map, hash_str};

impl Target {
  /// Structural hash over the identity fields: name, type, attributes and
  /// the missing-file policy. Paths, labels and ancestors are excluded.
  pub fn structure_hash(&self) -> u64 {
    StructHasher::new("RawTarget")
      .field("Name", hash_str(&self.name))
      .field("Type", hash_str(&self.kind))
      .field("Attributes", hash_map(&self.attributes))
      .field("IgnoreFileNotExistsError", hash_bool(self.ignore_file_not_exists_error))
      .finish()
  }

  /// SHA-256 fingerprint of the target.
  ///
  /// Feeds, in order: the structural hash as decimal text, one
  /// `<relPath>:<sha256>` line per hashed source file sorted by relative
  /// path, then ancestor hashes sorted in descending order.
  pub fn checksum(&self) -> Result<ContentHash, TargetError> {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}\n", self.structure_hash()).as_bytes());

    let excluded = self
      .exclude_from_hash
      .source_files
      .iter()
      .map(|f| self.normalize_source_file(f))
      .collect::<Result<Vec<_>, _>>()?;

    let mut files = self
      .source_files
      .iter()
      .map(|f| {
        let abs = self.normalize_source_file(f)?;
        Ok((self.rel_path(&abs), abs))
      })
      .collect::<Result<Vec<_>, TargetError>>()?;
    files.sort();

    for (rel, abs) in files {
      let meta = match fs::metadata(&abs) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound && self.ignore_file_not_exists_error => {
          debug!(file = %abs, "skipping missing source file");
          continue;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(TargetError::SourceFileMissing { path: abs }),
        Err(source) => return Err(TargetError::Io { path: abs, source }),
      };
      if meta.is_dir() {
        return Err(TargetError::SourceFileIsDirectory { path: abs });
      }
      if excluded.contains(&abs) {
        continue;
      }
      let content = hash_file(Path::new(&abs)).map_err(|e| TargetError::Io {
        path: abs.clone(),
        source: e.source,
      })?;
      hasher.update(format!("{rel}:{content}\n").as_bytes());
    }

    let mut ancestors: Vec<&str> = self.depends_on.iter().map(|d| d.hash.as_str()).collect();
    ancestors.sort_unstable_by(|a, b| b.cmp(a));
    for hash in ancestors {
      hasher.update(format!("{hash}\n").as_bytes());
    }

    Ok(ContentHash(hex::encode(hasher.finalize())))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{depends_on, target, target_with_attrs, write_file};
  use serde_json::json;
  use tempfile::tempdir;

  fn fixture_realm() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR"))
  }

  /// Pins the digest of the fixture files under `testdata/`.
  #[test]
  fn pinned_fixture_digest() {
    let realm = fixture_realm();
    let mut t = target(realm, "example", "test");
    t.file = realm.join("target_test.rs").to_string_lossy().into_owned();
    t.source_files = vec![
      realm.join("testdata/01_dont_change_me.txt").to_string_lossy().into_owned(),
      realm.join("testdata/02_dont_change_me.txt").to_string_lossy().into_owned(),
    ];

    let hash = t.checksum().unwrap();
    assert_eq!(hash.0, "974b5fe31e2f054d2b45222e60f3ed6b8102d1059c6fab5b4af1d3b93b714f6e");
    assert_eq!(t.checksum().unwrap(), hash);
  }

  #[test]
  fn empty_probe_digest() {
    let t = target(fixture_realm(), "probe_test", "probe");
    assert_eq!(t.structure_hash(), 3184437801010804651);
    assert_eq!(
      t.checksum().unwrap().0,
      "d8493e5c5d2f0769d16a30d6959a60f57bb605be678df83bb4865d9ea10bd55e"
    );
  }

  #[test]
  fn attributes_change_the_digest() {
    let t = target_with_attrs(
      fixture_realm(),
      "probe_test",
      "probe",
      json!({"address": "https://www.google.com"}),
    );
    assert_eq!(
      t.checksum().unwrap().0,
      "245c4e60463341c6da317f8ea66933a0394f2ef5e06a39ae839b83d664436a9b"
    );
  }

  #[test]
  fn ancestors_are_sorted_descending() {
    let mut t = target(fixture_realm(), "example", "test");
    t.depends_on = vec![depends_on("a", "aaa"), depends_on("c", "ccc"), depends_on("b", "bbb")];
    assert_eq!(
      t.checksum().unwrap().0,
      "e2e8cfdbd57ec538277f2a38b06940edfb306e4114dca182c1ff544facd93605"
    );

    t.depends_on.reverse();
    assert_eq!(
      t.checksum().unwrap().0,
      "e2e8cfdbd57ec538277f2a38b06940edfb306e4114dca182c1ff544facd93605"
    );
  }

  #[test]
  fn ignored_flag_is_part_of_the_structure() {
    let mut t = target(fixture_realm(), "example", "test");
    assert_eq!(t.structure_hash(), 16506022301804000336);
    t.ignore_file_not_exists_error = true;
    assert_eq!(t.structure_hash(), 2115853517390403408);
  }

  #[test]
  fn labels_and_paths_do_not_affect_structure() {
    let realm = fixture_realm();
    let a = target(realm, "example", "test");
    let mut b = a.clone();
    b.labels = vec!["slow".into()];
    b.file = realm.join("other/BUILD.hcl").to_string_lossy().into_owned();
    assert_eq!(a.structure_hash(), b.structure_hash());
  }

  #[test]
  fn source_file_content_changes_the_digest() {
    let temp = tempdir().unwrap();
    let src = write_file(temp.path(), "src/main.rs", "fn main() {}");
    let mut t = target(temp.path(), "bin", "test");
    t.source_files = vec![src.to_string_lossy().into_owned()];
    let before = t.checksum().unwrap();

    write_file(temp.path(), "src/main.rs", "fn main() { loop {} }");
    assert_ne!(t.checksum().unwrap(), before);
  }

  #[test]
  fn source_file_order_is_irrelevant() {
    let temp = tempdir().unwrap();
    write_file(temp.path(), "a.txt", "a");
    write_file(temp.path(), "b.txt", "b");
    let mut t = target(temp.path(), "bin", "test");
    t.source_files = vec!["a.txt".into(), "b.txt".into()];
    let forward = t.checksum().unwrap();
    t.source_files.reverse();
    assert_eq!(t.checksum().unwrap(), forward);
  }

  #[test]
  fn missing_source_file_fails() {
    let temp = tempdir().unwrap();
    let mut t = target(temp.path(), "bin", "test");
    t.source_files = vec!["missing.txt".into()];
    assert!(matches!(t.checksum(), Err(TargetError::SourceFileMissing { path }) if path.ends_with("missing.txt")));
  }

  #[test]
  fn missing_source_file_is_skipped_when_ignored() {
    let temp = tempdir().unwrap();
    let mut with_missing = target(temp.path(), "bin", "test");
    with_missing.ignore_file_not_exists_error = true;
    with_missing.source_files = vec!["missing.txt".into()];

    let mut without = with_missing.clone();
    without.source_files.clear();
    assert_eq!(with_missing.checksum().unwrap(), without.checksum().unwrap());
  }

  #[test]
  fn directory_source_file_fails() {
    let temp = tempdir().unwrap();
    std::fs::create_dir(temp.path().join("pkg")).unwrap();
    let mut t = target(temp.path(), "bin", "test");
    t.source_files = vec!["pkg".into()];
    assert!(matches!(t.checksum(), Err(TargetError::SourceFileIsDirectory { .. })));
  }

  #[test]
  fn excluded_files_do_not_affect_the_digest() {
    let temp = tempdir().unwrap();
    write_file(temp.path(), "a.txt", "a");
    write_file(temp.path(), "generated.txt", "v1");
    let mut t = target(temp.path(), "bin", "test");
    t.source_files = vec!["a.txt".into(), "generated.txt".into()];
    t.exclude_from_hash.source_files = vec!["generated.txt".into()];
    let before = t.checksum().unwrap();

    write_file(temp.path(), "generated.txt", "v2");
    assert_eq!(t.checksum().unwrap(), before);
  }
}
