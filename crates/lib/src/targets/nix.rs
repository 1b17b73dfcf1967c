//! `nix`: install packages into the user profile.
//!
//! The installed profile is the local cache tier. There is no remote tier.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{ActionContext, ActionError};
use crate::target::TargetError;

pub const TYPE: &str = "nix";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nix {
  /// Attribute paths such as `nixpkgs.hello`.
  #[serde(default)]
  pub packages: Vec<String>,
}

/// `nixpkgs.hello` -> `hello`.
fn package_name(attribute: &str) -> &str {
  attribute.rsplit('.').next().unwrap_or(attribute)
}

impl Nix {
  pub fn validate(&self) -> Result<(), TargetError> {
    if self.packages.is_empty() {
      return Err(TargetError::validation("packages", "is required"));
    }
    if self.packages.iter().any(|p| p.trim().is_empty()) {
      return Err(TargetError::validation("packages", "entries must not be empty"));
    }
    Ok(())
  }

  pub fn package_names(&self) -> Vec<&str> {
    self.packages.iter().map(|p| package_name(p)).collect()
  }

  pub fn artifact_attributes(&self) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("packages".to_string(), json!(self.package_names()));
    attrs
  }

  /// True when every declared package is present in the profile.
  pub async fn installed(&self, ctx: &ActionContext) -> Result<bool, ActionError> {
    let installed = ctx.clients.packages.installed().await?;
    let missing: Vec<&str> = self
      .package_names()
      .into_iter()
      .filter(|name| !installed.iter().any(|p| p.pname == *name))
      .collect();
    if !missing.is_empty() {
      debug!(missing = ?missing, "packages not installed");
    }
    Ok(missing.is_empty())
  }

  pub async fn execute(&self, ctx: &ActionContext) -> Result<(), ActionError> {
    for attribute in &self.packages {
      if ctx.cancel.is_cancelled() {
        return Err(ActionError::Cancelled);
      }
      info!(package = %attribute, "installing package");
      ctx.clients.packages.install(attribute).await?;
    }
    Ok(())
  }
}
