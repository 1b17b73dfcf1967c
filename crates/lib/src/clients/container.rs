//! Container runtime contract and the `docker` CLI implementation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::{ClientError, run_captured};

/// A build secret exposed to the image build as `--secret id=<id>,src=<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
  pub id: String,
  pub path: PathBuf,
}

/// Everything needed to build one image.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
  /// Gzipped tar of the build context, including the Dockerfile.
  pub context: Vec<u8>,
  /// Dockerfile path inside the context.
  pub dockerfile: String,
  pub tags: Vec<String>,
  /// `None` passes the variable through from the build environment.
  pub build_args: BTreeMap<String, Option<String>>,
  pub cache_from: Vec<String>,
  pub secrets: Vec<SecretMount>,
  /// Export the build result to this local directory.
  pub output: Option<PathBuf>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  /// True if the image is present in the local image store.
  async fn image_exists(&self, url: &str) -> Result<bool, ClientError>;

  /// True if the image manifest is present in its registry.
  async fn repo_image_exists(&self, url: &str) -> Result<bool, ClientError>;

  async fn push_image(&self, url: &str) -> Result<(), ClientError>;

  async fn pull_image(&self, url: &str) -> Result<(), ClientError>;

  async fn build_image(&self, request: BuildRequest) -> Result<(), ClientError>;
}

/// Drives the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
  program: String,
}

impl Default for DockerCli {
  fn default() -> Self {
    Self {
      program: "docker".to_string(),
    }
  }
}

impl DockerCli {
  pub fn with_program(program: impl Into<String>) -> Self {
    Self { program: program.into() }
  }

  /// Arguments for `docker build` reading the context from stdin.
  pub fn build_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec!["build".to_string(), "-f".to_string(), request.dockerfile.clone()];
    for tag in &request.tags {
      args.push("-t".to_string());
      args.push(tag.clone());
    }
    for (k, v) in &request.build_args {
      args.push("--build-arg".to_string());
      args.push(match v {
        Some(v) => format!("{k}={v}"),
        None => k.clone(),
      });
    }
    for image in &request.cache_from {
      args.push("--cache-from".to_string());
      args.push(image.clone());
    }
    for secret in &request.secrets {
      args.push("--secret".to_string());
      args.push(format!("id={},src={}", secret.id, secret.path.display()));
    }
    if let Some(dest) = &request.output {
      args.push("--output".to_string());
      args.push(format!("type=local,dest={}", dest.display()));
    }
    args.push("-".to_string());
    args
  }

  async fn succeeds(&self, args: &[&str]) -> Result<bool, ClientError> {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    match run_captured(&self.program, &args, None).await {
      Ok(_) => Ok(true),
      Err(ClientError::CmdFailed { .. }) => Ok(false),
      Err(e) => Err(e),
    }
  }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
  async fn image_exists(&self, url: &str) -> Result<bool, ClientError> {
    self.succeeds(&["image", "inspect", url]).await
  }

  async fn repo_image_exists(&self, url: &str) -> Result<bool, ClientError> {
    self.succeeds(&["manifest", "inspect", url]).await
  }

  async fn push_image(&self, url: &str) -> Result<(), ClientError> {
    info!(image = %url, "pushing image");
    run_captured(&self.program, &["push".to_string(), url.to_string()], None).await?;
    Ok(())
  }

  async fn pull_image(&self, url: &str) -> Result<(), ClientError> {
    info!(image = %url, "pulling image");
    run_captured(&self.program, &["pull".to_string(), url.to_string()], None).await?;
    Ok(())
  }

  async fn build_image(&self, request: BuildRequest) -> Result<(), ClientError> {
    let args = Self::build_args(&request);
    info!(tags = ?request.tags, "building image");
    run_captured(&self.program, &args, Some(request.context)).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn build_args_cover_every_option() {
    let request = BuildRequest {
      context: vec![],
      dockerfile: "Dockerfile".into(),
      tags: vec!["gcr.io/app:abc".into(), "gcr.io/app:latest".into()],
      build_args: BTreeMap::from([
        ("BUILDKIT_INLINE_CACHE".into(), Some("1".into())),
        ("NPM_TOKEN".into(), None),
      ]),
      cache_from: vec!["gcr.io/app:latest".into()],
      secrets: vec![SecretMount {
        id: "npmrc".into(),
        path: PathBuf::from("/tmp/s.json"),
      }],
      output: Some(PathBuf::from("/cache/output")),
    };

    assert_eq!(
      DockerCli::build_args(&request),
      vec![
        "build",
        "-f",
        "Dockerfile",
        "-t",
        "gcr.io/app:abc",
        "-t",
        "gcr.io/app:latest",
        "--build-arg",
        "BUILDKIT_INLINE_CACHE=1",
        "--build-arg",
        "NPM_TOKEN",
        "--cache-from",
        "gcr.io/app:latest",
        "--secret",
        "id=npmrc,src=/tmp/s.json",
        "--output",
        "type=local,dest=/cache/output",
        "-",
      ]
    );
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn failing_probe_reads_as_missing() {
    let docker = DockerCli::with_program("false");
    assert!(!docker.image_exists("x:y").await.unwrap());
    let docker = DockerCli::with_program("true");
    assert!(docker.repo_image_exists("x:y").await.unwrap());
  }
}
