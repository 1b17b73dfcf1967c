//! Per-matcher file sets with an aggregate content hash.

use std::collections::BTreeMap;
use std::fmt::Write;

use super::file::FileRecord;
use super::matcher::Matcher;
use crate::util::hash::hash_bytes;

/// The files an observer has seen that pass one [`Matcher`].
#[derive(Debug, Clone)]
pub struct FileMatchCache {
  pub matcher: Matcher,
  /// Matching files keyed by absolute name.
  pub files: BTreeMap<String, FileRecord>,
  pub hash: String,
  pub prev_hash: String,
}

impl FileMatchCache {
  pub fn new(matcher: Matcher) -> Self {
    let empty = hash_bytes(b"").0;
    Self {
      matcher,
      files: BTreeMap::new(),
      hash: empty.clone(),
      prev_hash: empty,
    }
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  /// Add or drop each matching file according to whether it still exists.
  pub fn update(&mut self, files: &[FileRecord]) {
    for file in files {
      if !self.matcher.check(&file.name) {
        continue;
      }
      if file.exists {
        self.files.insert(file.name.clone(), file.clone());
      } else {
        self.files.remove(&file.name);
      }
    }
  }

  /// Files sorted by relative name.
  pub fn sorted_files(&self) -> Vec<&FileRecord> {
    let mut files: Vec<&FileRecord> = self.files.values().collect();
    files.sort_by(|a, b| a.rel_name.cmp(&b.rel_name));
    files
  }

  /// Relative names, sorted.
  pub fn sorted_names(&self) -> Vec<String> {
    self.sorted_files().into_iter().map(|f| f.rel_name.clone()).collect()
  }

  /// Roll the current hash into `prev_hash` and recompute it over
  /// `"<sha1> <relName>\n"` for every regular file.
  pub fn compute_hash(&mut self) {
    let mut listing = String::new();
    for file in self.sorted_files() {
      if file.is_regular() {
        let _ = writeln!(listing, "{} {}", file.hash, file.rel_name);
      }
    }
    self.prev_hash = std::mem::replace(&mut self.hash, hash_bytes(listing.as_bytes()).0);
  }

  pub fn changed(&self) -> bool {
    self.hash != self.prev_hash
  }
}
