//! Workspace discovery and `.ark/settings.json`.
//!
//! A workspace is the nearest ancestor directory (the start included) that
//! holds `.ark/settings.json`. Every section of the file is optional.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::artifact::CacheConfig;
use crate::clients::{KvStorage, VaultStorage};
use crate::consts::{KV_DIR, SAFE_CONTEXTS_ENV, SETTINGS_FILE, WORKSPACE_DIR};
use crate::targets::ControlPlaneEnv;

/// Kubernetes contexts that are always safe to deploy to.
pub const DEFAULT_SAFE_CONTEXTS: [&str; 5] = ["local", "docker-desktop", "docker-for-desktop", "minikube", "kind"];

#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error(".ark/settings.json not found in {} or any parent directory", .start.display())]
  WorkspaceNotFound { start: PathBuf },

  #[error("failed to {op} {}: {source}", .path.display())]
  Io {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid settings in {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("kubernetes context {context} is unsafe, must be one of: {}", .safe.join(", "))]
  UnsafeContext { context: String, safe: Vec<String> },
}

impl WorkspaceError {
  fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
    move |source| Self::Io {
      op,
      path: path.to_path_buf(),
      source,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesSettings {
  pub safe_contexts: Vec<String>,
  pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
  pub address: String,
  pub encryption_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemSettings {
  /// Globs, relative to the workspace root, that the observer never reports.
  pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCacheSettings {
  pub url: String,
}

/// A container image usable as a function: reads stdin, writes a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plugin {
  pub name: String,
  pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
  pub org_id: String,
  pub project_id: String,
  pub api_url: String,
  pub event_sink_url: String,
  pub log_sink_url: String,
}

impl ControlPlaneSettings {
  fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
  #[serde(rename = "address")]
  pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalSettings {
  pub disable_entrypoint_injection: bool,
}

/// Decoded `.ark/settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub kubernetes: KubernetesSettings,
  pub vault: VaultSettings,
  pub file_system: FileSystemSettings,
  pub remote_cache: RemoteCacheSettings,
  pub plugins: Vec<Plugin>,
  pub control_plane: ControlPlaneSettings,
  pub user: UserSettings,
  pub internal: InternalSettings,
  pub disable_version_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
  root: PathBuf,
  pub settings: Settings,
}

/// The settings file under `dir`.
pub fn settings_file(dir: &Path) -> PathBuf {
  dir.join(WORKSPACE_DIR).join(SETTINGS_FILE)
}

/// The nearest directory at or above `start` holding a settings file.
pub fn find_root(start: &Path) -> Result<PathBuf, WorkspaceError> {
  let start = std::path::absolute(start).map_err(WorkspaceError::io("resolve", start))?;
  start
    .ancestors()
    .find(|dir| settings_file(dir).is_file())
    .map(Path::to_path_buf)
    .ok_or(WorkspaceError::WorkspaceNotFound { start })
}

impl Workspace {
  /// Discover and load the workspace enclosing `start`.
  pub fn load(start: &Path) -> Result<Self, WorkspaceError> {
    let root = find_root(start)?;
    let file = settings_file(&root);
    let bytes = std::fs::read(&file).map_err(WorkspaceError::io("read", &file))?;
    let settings = serde_json::from_slice(&bytes).map_err(|source| WorkspaceError::Parse {
      path: file.clone(),
      source,
    })?;
    debug!(root = %root.display(), "loaded workspace");
    Ok(Self { root, settings })
  }

  pub fn from_cwd() -> Result<Self, WorkspaceError> {
    let cwd = std::env::current_dir().map_err(WorkspaceError::io("resolve", Path::new(".")))?;
    Self::load(&cwd)
  }

  pub fn new(root: impl Into<PathBuf>, settings: Settings) -> Self {
    Self {
      root: root.into(),
      settings,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// `<root>/.ark`
  pub fn dir(&self) -> PathBuf {
    self.root.join(WORKSPACE_DIR)
  }

  pub fn file(&self) -> PathBuf {
    settings_file(&self.root)
  }

  /// Built-in defaults, then `ARK_K8S_SAFE_CONTEXTS`, then the settings list.
  pub fn safe_contexts(&self) -> Vec<String> {
    let from_env = std::env::var(SAFE_CONTEXTS_ENV).unwrap_or_default();
    DEFAULT_SAFE_CONTEXTS
      .iter()
      .map(|s| s.to_string())
      .chain(from_env.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from))
      .chain(self.settings.kubernetes.safe_contexts.iter().cloned())
      .collect()
  }

  pub fn check_context(&self, context: &str) -> Result<(), WorkspaceError> {
    let safe = self.safe_contexts();
    if safe.iter().any(|s| s == context) {
      return Ok(());
    }
    Err(WorkspaceError::UnsafeContext {
      context: context.to_string(),
      safe,
    })
  }

  /// Namespace from the run, falling back to the settings.
  pub fn namespace(&self, requested: Option<&str>) -> String {
    requested
      .filter(|ns| !ns.is_empty())
      .unwrap_or(&self.settings.kubernetes.namespace)
      .to_string()
  }

  pub fn cache_config(&self, home: impl Into<PathBuf>) -> CacheConfig {
    CacheConfig::new(home, &self.settings.remote_cache.url)
  }

  /// Control-plane settings injected into deployed workloads, when any are
  /// configured.
  pub fn control_plane_env(&self) -> Option<ControlPlaneEnv> {
    let cp = &self.settings.control_plane;
    if cp.is_empty() {
      return None;
    }
    Some(ControlPlaneEnv {
      event_sink_url: cp.event_sink_url.clone(),
      log_sink_url: cp.log_sink_url.clone(),
      user_token: self.settings.user.token.clone(),
      org_id: cp.org_id.clone(),
      project_id: cp.project_id.clone(),
    })
  }

  /// The settings address, else `VAULT_ADDR`.
  pub fn vault_address(&self) -> Option<String> {
    Some(self.settings.vault.address.clone())
      .filter(|a| !a.is_empty())
      .or_else(|| std::env::var("VAULT_ADDR").ok().filter(|a| !a.is_empty()))
  }

  /// Encrypted KV storage under `<root>/.ark/kv`, when Vault is configured
  /// and a token is available.
  pub fn kv_storage(&self, home: &Path) -> Option<Arc<dyn KvStorage>> {
    if self.settings.vault.encryption_key.is_empty() {
      return None;
    }
    let address = self.vault_address()?;
    let Some(token) = vault_token(home) else {
      warn!("vault is configured but no token was found");
      return None;
    };
    Some(Arc::new(VaultStorage::new(
      &address,
      &token,
      &self.settings.vault.encryption_key,
      self.dir().join(KV_DIR),
    )))
  }
}

/// `VAULT_TOKEN`, else the contents of `<home>/.vault-token`.
pub fn vault_token(home: &Path) -> Option<String> {
  if let Ok(token) = std::env::var("VAULT_TOKEN")
    && !token.is_empty()
  {
    return Some(token);
  }
  std::fs::read_to_string(home.join(".vault-token"))
    .ok()
    .map(|t| t.trim().to_string())
    .filter(|t| !t.is_empty())
}
