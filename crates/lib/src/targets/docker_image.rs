//! `docker_image`: build a container image from a generated Dockerfile.
//!
//! The artifact is the image `repo:hash`; the local tier is the runtime's
//! image store and the remote tier is the registry.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tempfile::NamedTempFile;
use tracing::info;

use super::{ActionContext, ActionError, required};
use crate::artifact::Artifact;
use crate::clients::{BuildRequest, SecretMount};
use crate::target::{Target, TargetError};
use crate::util::archive;

pub const TYPE: &str = "docker_image";

/// Image providing the in-container entrypoint binary.
pub const ENTRYPOINT_IMAGE: &str = "gcr.io/[insert-google-project]/domain/ark-entrypoint:7a227a8";

const DOCKERFILE: &str = "Dockerfile";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerImage {
  #[serde(default)]
  pub repo: String,
  #[serde(default)]
  pub dockerfile: String,
  /// KV storage paths mounted as build secrets, keyed by the same path.
  #[serde(default)]
  pub secrets: Vec<String>,
  #[serde(default)]
  pub disable_entrypoint_injection: bool,
  #[serde(default)]
  pub cache_inline: bool,
  #[serde(default, alias = "BuildArgs")]
  pub build_args: BTreeMap<String, Option<String>>,
  /// Export the build result into this directory under the cache dir.
  #[serde(default)]
  pub output: String,
  #[serde(default)]
  pub cache_from: Vec<String>,
}

impl DockerImage {
  pub fn validate(&self) -> Result<(), TargetError> {
    required("repo", &self.repo)?;
    required("dockerfile", &self.dockerfile)?;
    let escapes = Path::new(&self.output)
      .components()
      .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
      return Err(TargetError::validation(
        "output",
        format!("{:?} must be a relative path inside the cache directory", self.output),
      ));
    }
    Ok(())
  }

  pub fn url(&self, hash: &str) -> String {
    format!("{}:{hash}", self.repo)
  }

  pub fn artifact_attributes(&self, hash: &str) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("secrets".to_string(), json!(self.secrets));
    attrs.insert("url".to_string(), json!(self.url(hash)));
    attrs
  }

  /// The Dockerfile actually built, with the entrypoint stage injected.
  pub fn generate_dockerfile(&self, key: &str, hash: &str) -> String {
    if self.disable_entrypoint_injection {
      return self.dockerfile.clone();
    }

    let from_line = format!("FROM {ENTRYPOINT_IMAGE} as ark-entrypoint");
    let copy_lines = format!(
      "COPY --from=ark-entrypoint /ark-entrypoint-linux /usr/local/bin/ark-entrypoint\n\
       ENV ARK_TARGET_ADDRESS={key}\n\
       ENV ARK_TARGET_HASH={hash}\n"
    );

    let mut lines: Vec<String> = self.dockerfile.split('\n').map(str::to_string).collect();
    let first = lines.first().map(|l| l.trim().to_string()).unwrap_or_default();
    if first.starts_with('#') {
      lines[0] = format!("{first}\n{from_line}");
    } else {
      lines.insert(0, from_line);
    }
    lines.push(copy_lines);
    lines.join("\n")
  }

  pub async fn execute(&self, target: &Target, artifact: &Artifact, ctx: &ActionContext) -> Result<(), ActionError> {
    let mut build_args = self.build_args.clone();
    if self.cache_inline {
      build_args.insert("BUILDKIT_INLINE_CACHE".to_string(), Some("1".to_string()));
    }

    // Decrypted secrets live until the build returns; dropping removes them.
    let mut secret_files: Vec<NamedTempFile> = Vec::new();
    let mut secrets = Vec::new();
    if !self.secrets.is_empty() {
      let kv = ctx.clients.kv()?;
      for secret in &self.secrets {
        let file = kv.decrypt_to_file(secret).await?;
        secrets.push(SecretMount {
          id: secret.clone(),
          path: file.path().to_path_buf(),
        });
        secret_files.push(file);
      }
    }

    let files: Vec<(String, PathBuf)> = target
      .source_files
      .iter()
      .filter(|f| !target.ignore_file_not_exists_error || Path::new(f).exists())
      .map(|f| (target.rel_path(f), PathBuf::from(f)))
      .collect();
    let dockerfile = self.generate_dockerfile(&artifact.key, &artifact.hash);
    let context = tokio::task::spawn_blocking(move || {
      archive::gzip_tar_entries(&files, &[(DOCKERFILE.to_string(), dockerfile.into_bytes())])
    })
    .await
    .map_err(|e| ActionError::Failed(format!("packing build context: {e}")))??;

    let output = if self.output.is_empty() {
      None
    } else {
      Some(artifact.mk_cache_dir(&ctx.home)?.join(&self.output))
    };

    let url = self.url(&artifact.hash);
    info!(image = %url, context_size = context.len(), "building image");
    ctx
      .clients
      .container
      .build_image(BuildRequest {
        context,
        dockerfile: DOCKERFILE.to_string(),
        tags: vec![url, format!("{}:latest", self.repo)],
        build_args,
        cache_from: self.cache_from.clone(),
        secrets,
        output,
      })
      .await?;

    drop(secret_files);
    Ok(())
  }
}
