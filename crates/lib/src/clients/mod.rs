//! Backend client contracts shared by target actions.
//!
//! Every run owns one instance of each client, bundled in [`Clients`] and
//! handed to actions through the action context. The contracts are kept
//! small: only what the target types need. The default implementations
//! shell out to `docker`, `kubectl` and `nix-env`, or speak HTTP to Vault.

pub mod cluster;
pub mod container;
pub mod kv;
pub mod packages;

use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub use cluster::{ClusterClient, JobOutcome, Kubectl};
pub use container::{BuildRequest, ContainerRuntime, DockerCli, SecretMount};
pub use kv::{KvStorage, SecretEngine, VaultEngine, VaultStorage};
pub use packages::{InstalledPackage, NixEnv, PackageManager};

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  #[error("failed to spawn {cmd}: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{service} request to {url} failed: {message}")]
  Http {
    service: &'static str,
    url: String,
    message: String,
  },

  #[error("unexpected response from {service}: {message}")]
  Decode { service: &'static str, message: String },

  #[error("{op} {path} failed: {source}")]
  Io {
    op: &'static str,
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("timed out after {seconds}s waiting for {what}")]
  Timeout { what: String, seconds: u64 },

  #[error("client {0} is not configured")]
  NotConfigured(&'static str),
}

/// The per-run set of backend clients.
#[derive(Clone)]
pub struct Clients {
  pub container: Arc<dyn ContainerRuntime>,
  pub cluster: Arc<dyn ClusterClient>,
  pub packages: Arc<dyn PackageManager>,
  /// Encrypted key/value storage; absent when no Vault is configured.
  pub kv: Option<Arc<dyn KvStorage>>,
}

impl Clients {
  /// Clients backed by the local `docker`, `kubectl` and `nix-env` binaries.
  pub fn local(kube_context: Option<String>, kv: Option<Arc<dyn KvStorage>>) -> Self {
    Self {
      container: Arc::new(DockerCli::default()),
      cluster: Arc::new(Kubectl::new(kube_context)),
      packages: Arc::new(NixEnv),
      kv,
    }
  }

  pub fn kv(&self) -> Result<&Arc<dyn KvStorage>, ClientError> {
    self.kv.as_ref().ok_or(ClientError::NotConfigured("kv storage"))
  }
}

impl std::fmt::Debug for Clients {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Clients").field("kv", &self.kv.is_some()).finish_non_exhaustive()
  }
}

/// Render a command line for logs and errors.
fn display_cmd(program: &str, args: &[String]) -> String {
  std::iter::once(program.to_string())
    .chain(args.iter().cloned())
    .collect::<Vec<_>>()
    .join(" ")
}

/// Run a command to completion and return its trimmed stdout.
///
/// `stdin`, when given, is written to the child and closed.
pub(crate) async fn run_captured(program: &str, args: &[String], stdin: Option<Vec<u8>>) -> Result<String, ClientError> {
  let cmd = display_cmd(program, args);
  debug!(cmd = %cmd, "spawning process");

  let mut command = Command::new(program);
  command
    .args(args)
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
    .kill_on_drop(true);

  let mut child = command.spawn().map_err(|source| ClientError::Spawn {
    cmd: cmd.clone(),
    source,
  })?;

  // stdin is fed while output is drained.
  let writer = match (stdin, child.stdin.take()) {
    (Some(bytes), Some(mut pipe)) => Some(tokio::spawn(async move {
      use tokio::io::AsyncWriteExt;
      pipe.write_all(&bytes).await
    })),
    _ => None,
  };

  let output = child.wait_with_output().await.map_err(|source| ClientError::Spawn {
    cmd: cmd.clone(),
    source,
  })?;

  if let Some(writer) = writer {
    match writer.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => debug!(error = %e, "stdin closed early"),
      Err(e) => debug!(error = %e, "stdin writer aborted"),
    }
  }

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    return Err(ClientError::CmdFailed {
      cmd,
      code: output.status.code(),
    });
  }

  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command with stdout and stderr inherited from this process.
pub(crate) async fn run_inherited(program: &str, args: &[String]) -> Result<(), ClientError> {
  let cmd = display_cmd(program, args);
  debug!(cmd = %cmd, "spawning process");

  let status = Command::new(program)
    .args(args)
    .stdin(Stdio::null())
    .kill_on_drop(true)
    .status()
    .await
    .map_err(|source| ClientError::Spawn {
      cmd: cmd.clone(),
      source,
    })?;

  if !status.success() {
    return Err(ClientError::CmdFailed {
      cmd,
      code: status.code(),
    });
  }
  Ok(())
}
