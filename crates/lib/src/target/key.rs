use std::fmt;
use std::str::FromStr;

use super::TargetError;

/// A parsed target key, `<relative file path>:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
  pub path: String,
  pub name: String,
}

impl fmt::Display for TargetKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.path, self.name)
  }
}

impl FromStr for TargetKey {
  type Err = TargetError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    parse_key(s)
  }
}

/// Split a key into its path and name. Exactly one `:` is allowed.
pub fn parse_key(key: &str) -> Result<TargetKey, TargetError> {
  let parts: Vec<&str> = key.split(':').collect();
  match parts.as_slice() {
    [path, name] => Ok(TargetKey {
      path: path.to_string(),
      name: name.to_string(),
    }),
    _ => Err(TargetError::InvalidKey(key.to_string())),
  }
}
