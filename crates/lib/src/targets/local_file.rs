//! `local_file`: write declared content to a path.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use super::{ActionContext, ActionError, required};
use crate::artifact::Artifact;
use crate::target::TargetError;

pub const TYPE: &str = "local_file";

pub const RENDERED_FILE_PATH: &str = "renderedFilePath";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFile {
  #[serde(default)]
  pub filename: String,
  #[serde(default)]
  pub content: String,
}

impl LocalFile {
  pub fn validate(&self) -> Result<(), TargetError> {
    required("filename", &self.filename)?;
    required("content", &self.content)
  }

  /// `filename` when absolute, else relative to the artifact's cache dir.
  pub fn rendered_path(&self, cache_dir: &Path) -> PathBuf {
    let filename = Path::new(&self.filename);
    if filename.is_absolute() {
      filename.to_path_buf()
    } else {
      cache_dir.join(filename)
    }
  }

  pub fn artifact_attributes(&self, cache_dir: &Path) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert(
      RENDERED_FILE_PATH.to_string(),
      json!(self.rendered_path(cache_dir).to_string_lossy()),
    );
    attrs
  }

  pub async fn execute(&self, artifact: &Artifact, ctx: &ActionContext) -> Result<(), ActionError> {
    let path = self.rendered_path(&artifact.cache_dir(&ctx.home));
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(ActionError::io("mkdir", parent))?;
    }
    tokio::fs::write(&path, &self.content)
      .await
      .map_err(ActionError::io("write", &path))?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(ActionError::io("chmod", &path))?;
    }

    info!(path = %path.display(), bytes = self.content.len(), "wrote file");
    Ok(())
  }
}
