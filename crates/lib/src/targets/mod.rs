//! The closed set of target types.
//!
//! A generic [`Target`] carries its type as a string and its type-specific
//! payload as an attribute map. [`TargetKind::decode`] turns that pair into
//! one variant of a sum type whose payload is the typed, validated view.
//! Each variant decides:
//!
//! - what its artifact carries ([`TargetKind::artifact_attributes`]),
//! - whether caching applies ([`TargetKind::cacheable`]) and how the local
//!   and remote tiers are probed and transferred,
//! - the side effects of its action.
//!
//! [`derive`] bundles the fingerprint, the typed view and the artifact into a
//! [`Derivation`], the unit the scheduler works with.

pub mod deploy;
pub mod docker_image;
pub mod kube_exec;
pub mod local_file;
pub mod nix;
pub mod probe;
pub mod sync_kv;
pub mod test_job;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::artifact::{Artifact, ArtifactError, CacheConfig};
use crate::clients::{ClientError, Clients};
use crate::target::{Target, TargetError};
use crate::util::archive::ArchiveError;
use crate::util::hash::ContentHash;

pub use deploy::{ControlPlaneEnv, Deploy};
pub use docker_image::DockerImage;
pub use kube_exec::KubeExec;
pub use local_file::LocalFile;
pub use nix::Nix;
pub use probe::Probe;
pub use sync_kv::SyncKv;
pub use test_job::TestJob;

/// Every registered type string.
pub const TYPE_NAMES: [&str; 9] = [
  docker_image::TYPE,
  deploy::TYPE,
  kube_exec::TYPE,
  GROUP_TYPE,
  probe::TYPE,
  sync_kv::TYPE,
  test_job::TYPE,
  local_file::TYPE,
  nix::TYPE,
];

pub const GROUP_TYPE: &str = "group";

#[derive(Debug, Error)]
pub enum TargetTypeError {
  #[error("unknown target type {kind:?}")]
  UnknownTargetType { kind: String },

  #[error("invalid {kind} attributes: {message}")]
  Attributes { kind: String, message: String },

  #[error(transparent)]
  Target(#[from] TargetError),
}

#[derive(Debug, Error)]
pub enum ActionError {
  #[error(transparent)]
  Client(#[from] ClientError),

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error("{op} {path} failed: {source}")]
  Io {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid manifest: {0}")]
  Manifest(String),

  #[error("probe of {address} failed: {message}")]
  Probe { address: String, message: String },

  #[error("{0}")]
  Failed(String),

  #[error("cancelled")]
  Cancelled,
}

impl ActionError {
  pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| ActionError::Io { op, path, source }
  }
}

/// Collaborators handed to actions and cache probes for one run.
#[derive(Debug, Clone)]
pub struct ActionContext {
  pub home: PathBuf,
  /// Cluster namespace; empty means the client's default.
  pub namespace: String,
  pub clients: Clients,
  /// Control-plane settings injected into deployed workloads, when configured.
  pub control_plane: Option<ControlPlaneEnv>,
  pub cancel: CancellationToken,
}

/// Typed view of a target.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetKind {
  DockerImage(DockerImage),
  Deploy(Deploy),
  KubeExec(KubeExec),
  Group,
  Probe(Probe),
  SyncKv(SyncKv),
  Test(TestJob),
  LocalFile(LocalFile),
  Nix(Nix),
}

/// Decode `target.attributes` into `T`.
fn attributes<T: DeserializeOwned>(target: &Target) -> Result<T, TargetTypeError> {
  serde_json::from_value(Value::Object(target.attributes.clone())).map_err(|e| TargetTypeError::Attributes {
    kind: target.kind.clone(),
    message: e.to_string(),
  })
}

/// Fails with `<field> is required` when `value` is empty.
pub(crate) fn required(field: &str, value: &str) -> Result<(), TargetError> {
  if value.trim().is_empty() {
    return Err(TargetError::validation(field, "is required"));
  }
  Ok(())
}

impl TargetKind {
  /// Decode and validate the typed view of `target`.
  pub fn decode(target: &Target) -> Result<Self, TargetTypeError> {
    let kind = match target.kind.as_str() {
      docker_image::TYPE => TargetKind::DockerImage(attributes(target)?),
      deploy::TYPE => TargetKind::Deploy(attributes(target)?),
      kube_exec::TYPE => TargetKind::KubeExec(attributes(target)?),
      GROUP_TYPE => TargetKind::Group,
      probe::TYPE => TargetKind::Probe(attributes(target)?),
      sync_kv::TYPE => TargetKind::SyncKv(attributes(target)?),
      test_job::TYPE => TargetKind::Test(attributes(target)?),
      local_file::TYPE => TargetKind::LocalFile(attributes(target)?),
      nix::TYPE => TargetKind::Nix(attributes(target)?),
      other => {
        return Err(TargetTypeError::UnknownTargetType { kind: other.to_string() });
      }
    };
    kind.validate(target)?;
    Ok(kind)
  }

  fn validate(&self, target: &Target) -> Result<(), TargetError> {
    match self {
      TargetKind::DockerImage(t) => t.validate(),
      TargetKind::Deploy(t) => t.validate(),
      TargetKind::KubeExec(t) => t.validate(),
      TargetKind::Group => Ok(()),
      TargetKind::Probe(t) => t.validate(),
      TargetKind::SyncKv(t) => t.validate(target),
      TargetKind::Test(t) => t.validate(),
      TargetKind::LocalFile(t) => t.validate(),
      TargetKind::Nix(t) => t.validate(),
    }
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      TargetKind::DockerImage(_) => docker_image::TYPE,
      TargetKind::Deploy(_) => deploy::TYPE,
      TargetKind::KubeExec(_) => kube_exec::TYPE,
      TargetKind::Group => GROUP_TYPE,
      TargetKind::Probe(_) => probe::TYPE,
      TargetKind::SyncKv(_) => sync_kv::TYPE,
      TargetKind::Test(_) => test_job::TYPE,
      TargetKind::LocalFile(_) => local_file::TYPE,
      TargetKind::Nix(_) => nix::TYPE,
    }
  }

  /// Whether cache probes and remote persistence apply.
  pub fn cacheable(&self) -> bool {
    matches!(self, TargetKind::DockerImage(_) | TargetKind::Nix(_))
  }

  /// Type-specific artifact payload for a target at `hash`.
  pub fn artifact_attributes(&self, target: &Target, hash: &str, cache_dir: &Path) -> Map<String, Value> {
    match self {
      TargetKind::DockerImage(t) => t.artifact_attributes(hash),
      TargetKind::Deploy(_) => target.attributes.clone(),
      TargetKind::LocalFile(t) => t.artifact_attributes(cache_dir),
      TargetKind::Nix(t) => t.artifact_attributes(),
      TargetKind::KubeExec(_)
      | TargetKind::Group
      | TargetKind::Probe(_)
      | TargetKind::SyncKv(_)
      | TargetKind::Test(_) => Map::new(),
    }
  }
}

/// A target resolved against its fingerprint.
#[derive(Debug, Clone)]
pub struct Derivation {
  /// The target with every source path normalized.
  pub target: Target,
  pub kind: TargetKind,
  pub artifact: Artifact,
}

/// Validate, fingerprint and produce the artifact for `target`.
pub fn derive(target: &Target, cache: &CacheConfig) -> Result<Derivation, TargetTypeError> {
  target.validate()?;
  let target = target.normalized()?;
  let hash = target.checksum()?;
  let kind = TargetKind::decode(&target)?;
  let artifact = produce(&target, &kind, &hash, cache);
  debug!(target_key = %artifact.key, hash = %hash.short(), kind = kind.type_name(), "derived artifact");
  Ok(Derivation { target, kind, artifact })
}

/// Build the artifact record for an already-decoded target.
pub fn produce(target: &Target, kind: &TargetKind, hash: &ContentHash, cache: &CacheConfig) -> Artifact {
  let mut artifact = Artifact {
    key: target.key(),
    hash: hash.0.clone(),
    kind: target.kind.clone(),
    attributes: Map::new(),
    depends_on: target.depends_on.clone(),
    remote_cache_base_url: cache.remote_url.clone(),
  };
  let cache_dir = artifact.cache_dir(&cache.home);
  artifact.attributes = kind.artifact_attributes(target, &hash.0, &cache_dir);
  artifact
}

impl Derivation {
  pub fn key(&self) -> &str {
    &self.artifact.key
  }

  pub fn hash(&self) -> &str {
    &self.artifact.hash
  }

  pub fn cacheable(&self) -> bool {
    self.kind.cacheable()
  }

  /// Lifecycle hook run before any cache probe: prepares the cache directory.
  pub async fn pre_build(&self, ctx: &ActionContext) -> Result<(), ActionError> {
    self.artifact.mk_cache_dir(&ctx.home)?;
    Ok(())
  }

  pub async fn locally_cached(&self, ctx: &ActionContext) -> Result<bool, ActionError> {
    match &self.kind {
      TargetKind::DockerImage(t) => Ok(ctx.clients.container.image_exists(&t.url(self.hash())).await?),
      TargetKind::Nix(t) => t.installed(ctx).await,
      _ => Ok(self.artifact.locally_cached(&ctx.home)),
    }
  }

  pub async fn remotely_cached(&self, ctx: &ActionContext) -> Result<bool, ActionError> {
    match &self.kind {
      TargetKind::DockerImage(t) => Ok(ctx.clients.container.repo_image_exists(&t.url(self.hash())).await?),
      TargetKind::Nix(_) => Ok(false),
      _ => Ok(self.artifact.remotely_cached().await?),
    }
  }

  pub async fn push(&self, ctx: &ActionContext) -> Result<(), ActionError> {
    match &self.kind {
      TargetKind::DockerImage(t) => Ok(ctx.clients.container.push_image(&t.url(self.hash())).await?),
      TargetKind::Nix(_) => Ok(()),
      _ => Ok(self.artifact.push(&ctx.home).await?),
    }
  }

  pub async fn pull(&self, ctx: &ActionContext) -> Result<(), ActionError> {
    match &self.kind {
      TargetKind::DockerImage(t) => Ok(ctx.clients.container.pull_image(&t.url(self.hash())).await?),
      TargetKind::Nix(_) => Ok(()),
      _ => Ok(self.artifact.pull(&ctx.home).await?),
    }
  }

  /// Run the type's action.
  pub async fn build(&self, ctx: &ActionContext) -> Result<(), ActionError> {
    let (target, artifact) = (&self.target, &self.artifact);
    match &self.kind {
      TargetKind::DockerImage(t) => t.execute(target, artifact, ctx).await,
      TargetKind::Deploy(t) => t.execute(target, artifact, ctx).await,
      TargetKind::KubeExec(t) => t.execute(ctx).await,
      TargetKind::Group => Ok(()),
      TargetKind::Probe(t) => t.execute(ctx).await,
      TargetKind::SyncKv(t) => t.execute(target, ctx).await,
      TargetKind::Test(t) => t.execute(target, artifact, ctx).await,
      TargetKind::LocalFile(t) => t.execute(artifact, ctx).await,
      TargetKind::Nix(t) => t.execute(ctx).await,
    }
  }

  /// Write the local cache marker.
  pub fn save_local_state(&self, home: &Path) -> Result<(), ActionError> {
    self.artifact.write_state(home)?;
    Ok(())
  }
}

#[cfg(test)]
pub(crate) mod fakes;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use crate::util::testutil::{target, target_with_attrs};
  use serde_json::json;

  fn cache() -> CacheConfig {
    CacheConfig::new("/home/u", "file:///tmp/remote")
  }

  #[test]
  fn unknown_type_is_rejected() {
    let t = target(Path::new("/work"), "x", "helm_chart");
    assert!(matches!(
      TargetKind::decode(&t),
      Err(TargetTypeError::UnknownTargetType { kind }) if kind == "helm_chart"
    ));
  }

  #[test]
  fn every_registered_type_decodes_its_name() {
    let samples = [
      json!({"repo": "gcr.io/app", "dockerfile": "FROM node"}),
      json!({"manifest": "kind: ConfigMap"}),
      json!({"resourceType": "deployment", "resourceName": "api", "command": ["ls"]}),
      json!({}),
      json!({"address": "tcp://localhost:5432"}),
      json!({"engine": "vault", "engineUrl": "http://vault:8200", "token": "t"}),
      json!({"command": ["go"], "args": ["test"], "image": "golang"}),
      json!({"filename": "out.txt", "content": "hi"}),
      json!({"packages": ["nixpkgs.hello"]}),
    ];
    for (name, attrs) in TYPE_NAMES.iter().zip(samples) {
      let mut t = target_with_attrs(Path::new("/work"), "x", name, attrs);
      if *name == sync_kv::TYPE {
        t.source_files = vec!["/work/.ark/kv/app".into()];
      }
      let kind = TargetKind::decode(&t).unwrap_or_else(|e| panic!("{name}: {e}"));
      assert_eq!(kind.type_name(), *name);
    }
  }

  #[test]
  fn only_images_and_packages_are_cacheable() {
    let image = target_with_attrs(
      Path::new("/work"),
      "x",
      "docker_image",
      json!({"repo": "r", "dockerfile": "FROM a"}),
    );
    let nix = target_with_attrs(Path::new("/work"), "x", "nix", json!({"packages": ["nixpkgs.jq"]}));
    let file = target_with_attrs(
      Path::new("/work"),
      "x",
      "local_file",
      json!({"filename": "a", "content": "b"}),
    );
    assert!(TargetKind::decode(&image).unwrap().cacheable());
    assert!(TargetKind::decode(&nix).unwrap().cacheable());
    assert!(!TargetKind::decode(&file).unwrap().cacheable());
    assert!(!TargetKind::Group.cacheable());
  }

  #[test]
  fn wrong_attribute_shape_is_reported() {
    let t = target_with_attrs(Path::new("/work"), "x", "nix", json!({"packages": "hello"}));
    assert!(matches!(
      TargetKind::decode(&t),
      Err(TargetTypeError::Attributes { kind, .. }) if kind == "nix"
    ));
  }

  #[test]
  fn image_artifact_url_is_repo_and_hash() {
    let t = target_with_attrs(
      Path::new("/work"),
      "api",
      "docker_image",
      json!({"repo": "gcr.io", "dockerfile": "FROM node"}),
    );
    let kind = TargetKind::decode(&t).unwrap();
    let artifact = produce(&t, &kind, &hash_bytes(b""), &cache());
    assert_eq!(
      artifact.hash,
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(
      artifact.attributes.get("url"),
      Some(&json!(
        "gcr.io:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
      ))
    );
    assert_eq!(artifact.remote_cache_base_url, "file:///tmp/remote");
  }

  #[test]
  fn derive_fingerprints_the_normalized_target() {
    let t = target_with_attrs(
      Path::new("/work"),
      "probe_test",
      "probe",
      json!({"address": "https://www.google.com"}),
    );
    let d = derive(&t, &cache()).unwrap();
    assert_eq!(d.key(), "BUILD.hcl:probe_test");
    assert_eq!(
      d.hash(),
      "245c4e60463341c6da317f8ea66933a0394f2ef5e06a39ae839b83d664436a9b"
    );
    assert!(!d.cacheable());
  }

  #[test]
  fn derive_rejects_generic_validation_failures() {
    let mut t = target(Path::new("/work"), "x", "group");
    t.realm.clear();
    assert!(matches!(derive(&t, &cache()), Err(TargetTypeError::Target(_))));
  }
}
