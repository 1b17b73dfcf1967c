//! Package manager contract and the `nix-env` implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ClientError, run_captured, run_inherited};

/// One entry of `nix-env --query --installed --json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstalledPackage {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub pname: String,
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub system: String,
}

#[async_trait]
pub trait PackageManager: Send + Sync {
  async fn installed(&self) -> Result<Vec<InstalledPackage>, ClientError>;

  /// Install one attribute path, e.g. `nixpkgs.hello`.
  async fn install(&self, attribute: &str) -> Result<(), ClientError>;
}

/// Drives `nix-env` in the user profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixEnv;

/// Parse the `--json` query output, keyed by store path name.
pub fn parse_installed(raw: &str) -> Result<Vec<InstalledPackage>, ClientError> {
  if raw.trim().is_empty() {
    return Ok(Vec::new());
  }
  let map: BTreeMap<String, InstalledPackage> = serde_json::from_str(raw).map_err(|e| ClientError::Decode {
    service: "nix-env",
    message: e.to_string(),
  })?;
  Ok(map.into_values().collect())
}

#[async_trait]
impl PackageManager for NixEnv {
  async fn installed(&self) -> Result<Vec<InstalledPackage>, ClientError> {
    let args = ["--query", "--installed", "--json"].map(String::from);
    let out = run_captured("nix-env", &args, None).await?;
    parse_installed(&out)
  }

  async fn install(&self, attribute: &str) -> Result<(), ClientError> {
    let args = ["--quiet", "-iA", attribute].map(String::from);
    run_inherited("nix-env", &args).await
  }
}
