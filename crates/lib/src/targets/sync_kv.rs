//! `sync_kv`: copy encrypted key/value files into a secret engine.
//!
//! Each source file must live under the KV storage's encrypted data path.
//! The path relative to it names the secret: its decrypted content is
//! written to `secret/data/<path>` once the engine reports healthy.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::probe::retry;
use super::{ActionContext, ActionError, required};
use crate::clients::{ClientError, KvStorage, SecretEngine, VaultEngine};
use crate::target::{Target, TargetError};

pub const TYPE: &str = "sync_kv";

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 5;
const HEALTH_RETRY_DELAY: Duration = Duration::from_secs(3);
const WORKERS: usize = 50;
const QUEUE_SIZE: usize = 100;

const SUPPORTED_ENGINES: [&str; 1] = ["vault"];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncKv {
  #[serde(default)]
  pub engine: String,
  #[serde(default)]
  pub engine_url: String,
  #[serde(default)]
  pub token: String,
  #[serde(default)]
  pub timeout_seconds: u64,
  #[serde(default)]
  pub max_retries: u32,
}

/// KV engine v2 data path for a secret.
pub fn secret_data_path(path: &str) -> String {
  format!("secret/data/{}", path.trim_start_matches('/'))
}

impl SyncKv {
  pub fn validate(&self, target: &Target) -> Result<(), TargetError> {
    required("engine", &self.engine)?;
    if !SUPPORTED_ENGINES.contains(&self.engine.as_str()) {
      return Err(TargetError::validation("engine", format!("{:?} is not supported", self.engine)));
    }
    required("engineUrl", &self.engine_url)?;
    required("token", &self.token)?;
    if target.source_files.is_empty() {
      return Err(TargetError::validation("sourceFiles", "is required"));
    }
    Ok(())
  }

  pub fn timeout(&self) -> Duration {
    match self.timeout_seconds {
      0 => Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
      s => Duration::from_secs(s),
    }
  }

  pub fn max_retries(&self) -> u32 {
    if self.max_retries == 0 { DEFAULT_MAX_RETRIES } else { self.max_retries }
  }

  /// Secret paths for every source file, relative to the encrypted data path.
  pub fn secret_paths(&self, target: &Target, kv: &dyn KvStorage) -> Result<Vec<String>, ActionError> {
    let prefix = kv.encrypted_data_path().to_string_lossy().into_owned();
    target
      .source_files
      .iter()
      .map(|file| {
        file
          .strip_prefix(prefix.as_str())
          .map(|rest| rest.trim_start_matches('/').to_string())
          .ok_or_else(|| {
            ActionError::Failed(format!("the source file {file} does not match the prefix: {prefix}"))
          })
      })
      .collect()
  }

  pub async fn execute(&self, target: &Target, ctx: &ActionContext) -> Result<(), ActionError> {
    let kv = ctx.clients.kv()?.clone();
    let engine: Arc<dyn SecretEngine> = Arc::new(VaultEngine::new(&self.engine_url, &self.token));
    tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
      res = self.sync(target, kv, engine) => res,
    }
  }

  /// Wait for `engine` to be healthy, then copy every source file into it.
  pub async fn sync(
    &self,
    target: &Target,
    kv: Arc<dyn KvStorage>,
    engine: Arc<dyn SecretEngine>,
  ) -> Result<(), ActionError> {
    let paths = self.secret_paths(target, kv.as_ref())?;
    self.wait_healthy(engine.as_ref()).await?;

    let (tx, rx) = mpsc::channel::<String>(QUEUE_SIZE);
    let queue = Arc::new(Mutex::new(rx));
    let mut workers = JoinSet::new();
    for _ in 0..WORKERS.min(paths.len()) {
      workers.spawn(copy_secrets(queue.clone(), kv.clone(), engine.clone()));
    }
    drop(queue);

    let total = paths.len();
    for path in paths {
      if tx.send(path).await.is_err() {
        // every worker has exited; the join below reports why
        break;
      }
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
      joined.map_err(|e| ActionError::Failed(format!("sync worker aborted: {e}")))??;
    }
    info!(engine = %self.engine_url, secrets = total, "synced key/value data");
    Ok(())
  }

  async fn wait_healthy(&self, engine: &dyn SecretEngine) -> Result<(), ActionError> {
    let timeout = self.timeout();
    let unhealthy = |message: String| ActionError::Probe {
      address: self.engine_url.clone(),
      message,
    };
    let unhealthy = &unhealthy;
    retry(
      self.max_retries(),
      HEALTH_RETRY_DELAY,
      || async move {
        match tokio::time::timeout(timeout, engine.healthy()).await {
          Ok(Ok(true)) => Ok(()),
          Ok(Ok(false)) => Err(unhealthy("not healthy".to_string())),
          Ok(Err(e)) => Err(unhealthy(e.to_string())),
          Err(_) => Err(unhealthy(format!("no answer within {}s", timeout.as_secs()))),
        }
      },
      |err, remaining| {
        warn!(error = %err, remaining, "waiting for secret engine to initialize and unseal");
      },
    )
    .await
  }
}

async fn copy_secrets(
  queue: Arc<Mutex<mpsc::Receiver<String>>>,
  kv: Arc<dyn KvStorage>,
  engine: Arc<dyn SecretEngine>,
) -> Result<(), ClientError> {
  loop {
    let next = queue.lock().await.recv().await;
    let Some(path) = next else {
      return Ok(());
    };
    let data = kv.get(&path).await?;
    engine.write(&secret_data_path(&path), json!({ "data": data })).await?;
    debug!(path = %path, "synced secret");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::targets::fakes;
  use crate::util::testutil::target;
  use mockito::Matcher;
  use tempfile::TempDir;

  fn sync_kv(url: &str) -> SyncKv {
    SyncKv {
      engine: "vault".into(),
      engine_url: url.into(),
      token: "root".into(),
      max_retries: 1,
      ..Default::default()
    }
  }

  fn kv_target(home: &std::path::Path, files: &[&str]) -> Target {
    let mut t = target(home, "secrets", TYPE);
    t.source_files = files
      .iter()
      .map(|f| home.join("kv").join(f).to_string_lossy().into_owned())
      .collect();
    t
  }

  #[test]
  fn validation() {
    let t = kv_target(std::path::Path::new("/work"), &["app"]);
    assert!(sync_kv("http://vault:8200").validate(&t).is_ok());
    assert!(sync_kv("").validate(&t).is_err());

    let mut consul = sync_kv("http://vault:8200");
    consul.engine = "consul".into();
    assert!(matches!(consul.validate(&t), Err(TargetError::Validation { field, .. }) if field == "engine"));

    let bare = target(std::path::Path::new("/work"), "secrets", TYPE);
    assert!(sync_kv("http://vault:8200").validate(&bare).is_err());
  }

  #[test]
  fn defaults() {
    let s = SyncKv::default();
    assert_eq!(s.timeout(), Duration::from_secs(60));
    assert_eq!(s.max_retries(), 5);
    assert_eq!(secret_data_path("/app/db"), "secret/data/app/db");
  }

  #[tokio::test]
  async fn files_outside_the_data_path_are_rejected() {
    let home = TempDir::new().unwrap();
    let (ctx, _) = fakes::context(home.path());
    let mut t = kv_target(home.path(), &["app"]);
    t.source_files.push("/elsewhere/secret".into());

    let err = sync_kv("http://127.0.0.1:1").execute(&t, &ctx).await.unwrap_err();
    assert!(err.to_string().contains("does not match the prefix"));
  }

  #[tokio::test]
  async fn copies_every_secret_once_healthy() {
    let mut server = mockito::Server::new_async().await;
    let health = server
      .mock("GET", "/v1/sys/health")
      .with_body(r#"{"initialized": true, "sealed": false}"#)
      .create_async()
      .await;
    let db = server
      .mock("POST", "/v1/secret/data/app/db")
      .match_header("X-Vault-Token", "root")
      .match_body(Matcher::Json(json!({"data": {"password": "hunter2"}})))
      .create_async()
      .await;
    let api = server
      .mock("POST", "/v1/secret/data/app/api")
      .match_body(Matcher::Json(json!({"data": {"key": "k"}})))
      .create_async()
      .await;

    let home = TempDir::new().unwrap();
    let (ctx, fakes) = fakes::context(home.path());
    fakes.kv.insert("app/db", json!({"password": "hunter2"}));
    fakes.kv.insert("app/api", json!({"key": "k"}));

    let t = kv_target(home.path(), &["app/db", "app/api"]);
    sync_kv(&server.url()).execute(&t, &ctx).await.unwrap();

    health.assert_async().await;
    db.assert_async().await;
    api.assert_async().await;
  }

  #[tokio::test]
  async fn sealed_engine_fails_after_retries() {
    let mut server = mockito::Server::new_async().await;
    let _health = server
      .mock("GET", "/v1/sys/health")
      .with_status(503)
      .with_body(r#"{"initialized": true, "sealed": true}"#)
      .create_async()
      .await;

    let home = TempDir::new().unwrap();
    let (ctx, _) = fakes::context(home.path());
    let t = kv_target(home.path(), &["app/db"]);
    let err = sync_kv(&server.url()).execute(&t, &ctx).await.unwrap_err();
    assert!(matches!(err, ActionError::Probe { message, .. } if message == "not healthy"));
  }

  #[tokio::test]
  async fn missing_secret_fails_the_sync() {
    let mut server = mockito::Server::new_async().await;
    let _health = server
      .mock("GET", "/v1/sys/health")
      .with_body(r#"{"initialized": true, "sealed": false}"#)
      .create_async()
      .await;

    let home = TempDir::new().unwrap();
    let (ctx, _) = fakes::context(home.path());
    let t = kv_target(home.path(), &["app/missing"]);
    let err = sync_kv(&server.url()).execute(&t, &ctx).await.unwrap_err();
    assert!(matches!(err, ActionError::Client(ClientError::Io { .. })));
  }
}
