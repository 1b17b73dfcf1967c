//! Path prefix and glob matching.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use super::ObserverError;

/// Selects files by path prefix, inclusion globs and exclusion globs.
///
/// [`Matcher::check`] combines the three:
///
/// | paths | includes | match when                          |
/// |-------|----------|-------------------------------------|
/// | yes   | yes      | prefixed, included and not excluded |
/// | yes   | no       | prefixed and not excluded           |
/// | no    | yes      | included and not excluded           |
/// | no    | no       | not excluded                        |
///
/// A matcher with nothing configured matches nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Matcher {
  #[serde(default)]
  pub paths: Vec<String>,
  #[serde(default)]
  pub includes: Vec<String>,
  #[serde(default)]
  pub excludes: Vec<String>,
  #[serde(skip)]
  compiled: Option<(GlobSet, GlobSet)>,
}

fn compile(patterns: &[String]) -> Result<GlobSet, ObserverError> {
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let glob = Glob::new(pattern.trim()).map_err(|source| ObserverError::Pattern {
      pattern: pattern.clone(),
      source,
    })?;
    builder.add(glob);
  }
  builder.build().map_err(|source| ObserverError::Pattern {
    pattern: patterns.join(", "),
    source,
  })
}

impl Matcher {
  /// A compiled matcher over `paths` only.
  pub fn for_paths(paths: Vec<String>) -> Result<Self, ObserverError> {
    Self::new(paths, Vec::new(), Vec::new())
  }

  pub fn new(paths: Vec<String>, includes: Vec<String>, excludes: Vec<String>) -> Result<Self, ObserverError> {
    let mut matcher = Matcher {
      paths,
      includes,
      excludes,
      compiled: None,
    };
    matcher.compile()?;
    Ok(matcher)
  }

  /// (Re)compile the glob sets. Uncompiled globs never match.
  pub fn compile(&mut self) -> Result<(), ObserverError> {
    self.compiled = Some((compile(&self.includes)?, compile(&self.excludes)?));
    Ok(())
  }

  pub fn has_prefix(&self, path: &str) -> bool {
    self.paths.iter().any(|p| path.starts_with(p.as_str()))
  }

  pub fn included(&self, path: &str) -> bool {
    self.compiled.as_ref().is_some_and(|(inc, _)| inc.is_match(path))
  }

  pub fn excluded(&self, path: &str) -> bool {
    self.compiled.as_ref().is_some_and(|(_, exc)| exc.is_match(path))
  }

  pub fn check(&self, path: &str) -> bool {
    if self.paths.is_empty() && self.includes.is_empty() && self.excludes.is_empty() {
      return false;
    }
    match (self.paths.is_empty(), self.includes.is_empty()) {
      (false, false) => self.has_prefix(path) && self.included(path) && !self.excluded(path),
      (false, true) => self.has_prefix(path) && !self.excluded(path),
      (true, false) => self.included(path) && !self.excluded(path),
      (true, true) => !self.excluded(path),
    }
  }

  /// Whether any of `paths` passes [`Matcher::check`].
  pub fn some<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> bool {
    paths.into_iter().any(|p| self.check(p))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn m(paths: &[&str], includes: &[&str], excludes: &[&str]) -> Matcher {
    let own = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
    Matcher::new(own(paths), own(includes), own(excludes)).unwrap()
  }

  #[test]
  fn empty_matcher_matches_nothing() {
    assert!(!m(&[], &[], &[]).check("/ws/a.go"));
  }

  #[test]
  fn prefix_with_includes() {
    let matcher = m(&["/ws/src"], &["**/*.go"], &["**/*_test.go"]);
    assert!(matcher.check("/ws/src/main.go"));
    assert!(!matcher.check("/ws/src/main_test.go"));
    assert!(!matcher.check("/ws/src/README.md"));
    assert!(!matcher.check("/ws/other/main.go"));
  }

  #[test]
  fn prefix_without_includes() {
    let matcher = m(&["/ws/src"], &[], &["*.swp"]);
    assert!(matcher.check("/ws/src/anything.txt"));
    assert!(!matcher.check("/ws/src/.main.go.swp"));
    assert!(!matcher.check("/ws/lib/anything.txt"));
  }

  #[test]
  fn includes_without_prefix() {
    let matcher = m(&[], &["*.ts"], &["*.d.ts"]);
    assert!(matcher.check("/anywhere/index.ts"));
    assert!(!matcher.check("/anywhere/index.d.ts"));
  }

  #[test]
  fn excludes_only() {
    let matcher = m(&[], &[], &["*/node_modules/*"]);
    assert!(matcher.check("/ws/src/index.js"));
    assert!(!matcher.check("/ws/node_modules/x/index.js"));
  }

  #[test]
  fn some_and_invalid_patterns() {
    let matcher = m(&["/ws/a"], &[], &[]);
    assert!(matcher.some(["/ws/b/1", "/ws/a/2"]));
    assert!(!matcher.some(["/ws/b/1"]));
    assert!(matches!(
      Matcher::new(vec![], vec!["a[".into()], vec![]),
      Err(ObserverError::Pattern { .. })
    ));
  }
}
