use std::path::PathBuf;

use thiserror::Error;

use crate::consts::{APP_NAME, ARTIFACTS_DIR, HOME_ENV};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
  #[error("unable to determine the home directory: none of {0} are set")]
  HomeNotSet(&'static str),
}

#[cfg(windows)]
const HOME_VARS: &[&str] = &[HOME_ENV, "USERPROFILE"];

#[cfg(not(windows))]
const HOME_VARS: &[&str] = &[HOME_ENV, "HOME"];

/// Returns the home directory that anchors the local artifact cache.
///
/// `ARK_HOME` wins over the platform home variable so tests and CI can
/// isolate the cache.
pub fn home_dir() -> Result<PathBuf, PathError> {
  HOME_VARS
    .iter()
    .filter_map(|var| std::env::var_os(var))
    .find(|value| !value.is_empty())
    .map(PathBuf::from)
    .ok_or(PathError::HomeNotSet(if cfg!(windows) {
      "ARK_HOME, USERPROFILE"
    } else {
      "ARK_HOME, HOME"
    }))
}

/// Returns `<home>/ark/artifacts`.
pub fn artifacts_dir(home: &std::path::Path) -> PathBuf {
  home.join(APP_NAME).join(ARTIFACTS_DIR)
}
