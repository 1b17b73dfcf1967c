//! Recording in-process clients for action and scheduler unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::ActionContext;
use crate::clients::{
  BuildRequest, ClientError, Clients, ClusterClient, ContainerRuntime, InstalledPackage, JobOutcome, KvStorage,
  PackageManager,
};

#[derive(Default)]
pub struct FakeContainer {
  pub local: Mutex<BTreeSet<String>>,
  pub remote: Mutex<BTreeSet<String>>,
  pub builds: Mutex<Vec<BuildRequest>>,
  pub pushes: Mutex<Vec<String>>,
  pub pulls: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerRuntime for FakeContainer {
  async fn image_exists(&self, url: &str) -> Result<bool, ClientError> {
    Ok(self.local.lock().unwrap().contains(url))
  }

  async fn repo_image_exists(&self, url: &str) -> Result<bool, ClientError> {
    Ok(self.remote.lock().unwrap().contains(url))
  }

  async fn push_image(&self, url: &str) -> Result<(), ClientError> {
    self.pushes.lock().unwrap().push(url.to_string());
    self.remote.lock().unwrap().insert(url.to_string());
    Ok(())
  }

  async fn pull_image(&self, url: &str) -> Result<(), ClientError> {
    self.pulls.lock().unwrap().push(url.to_string());
    self.local.lock().unwrap().insert(url.to_string());
    Ok(())
  }

  async fn build_image(&self, request: BuildRequest) -> Result<(), ClientError> {
    self.local.lock().unwrap().extend(request.tags.iter().cloned());
    self.builds.lock().unwrap().push(request);
    Ok(())
  }
}

pub struct FakeCluster {
  pub calls: Mutex<Vec<String>>,
  pub workloads: Mutex<Vec<String>>,
  pub job_outcome: Mutex<JobOutcome>,
  /// Copy of every applied manifest, in order.
  pub applied: Mutex<Vec<String>>,
}

impl Default for FakeCluster {
  fn default() -> Self {
    Self {
      calls: Mutex::default(),
      workloads: Mutex::default(),
      job_outcome: Mutex::new(JobOutcome::Succeeded),
      applied: Mutex::default(),
    }
  }
}

impl FakeCluster {
  fn record(&self, call: String) {
    self.calls.lock().unwrap().push(call);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl ClusterClient for FakeCluster {
  async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClientError> {
    self.record(format!("ensure_namespace {namespace}"));
    Ok(())
  }

  async fn apply(&self, namespace: &str, manifest: &Path) -> Result<(), ClientError> {
    self.record(format!("apply {namespace}"));
    let content = std::fs::read_to_string(manifest).unwrap_or_default();
    self.applied.lock().unwrap().push(content);
    Ok(())
  }

  async fn delete(&self, namespace: &str, _manifest: &Path) -> Result<(), ClientError> {
    self.record(format!("delete {namespace}"));
    Ok(())
  }

  async fn find_workloads(&self, namespace: &str, selector: &str) -> Result<Vec<String>, ClientError> {
    self.record(format!("find_workloads {namespace} {selector}"));
    Ok(self.workloads.lock().unwrap().clone())
  }

  async fn rollout_status(&self, namespace: &str, resource: &str, timeout: Duration) -> Result<(), ClientError> {
    self.record(format!("rollout_status {namespace} {resource} {}", timeout.as_secs()));
    Ok(())
  }

  async fn resolve_pod(
    &self,
    namespace: &str,
    resource_type: &str,
    resource_name: &str,
    timeout: Duration,
  ) -> Result<String, ClientError> {
    self.record(format!(
      "resolve_pod {namespace} {resource_type}/{resource_name} {}",
      timeout.as_secs()
    ));
    Ok(format!("{resource_name}-pod"))
  }

  async fn exec(
    &self,
    namespace: &str,
    pod: &str,
    container: Option<&str>,
    command: &[String],
  ) -> Result<(), ClientError> {
    self.record(format!(
      "exec {namespace} {pod} {} {}",
      container.unwrap_or("-"),
      command.join(" ")
    ));
    Ok(())
  }

  async fn stream_logs(&self, namespace: &str, selector: &str, _timeout: Duration) -> Result<(), ClientError> {
    self.record(format!("stream_logs {namespace} {selector}"));
    Ok(())
  }

  async fn wait_for_job(&self, namespace: &str, name: &str, timeout: Duration) -> Result<JobOutcome, ClientError> {
    self.record(format!("wait_for_job {namespace} {name} {}", timeout.as_secs()));
    Ok(*self.job_outcome.lock().unwrap())
  }
}

#[derive(Default)]
pub struct FakePackages {
  pub installed: Mutex<Vec<InstalledPackage>>,
  pub installs: Mutex<Vec<String>>,
}

#[async_trait]
impl PackageManager for FakePackages {
  async fn installed(&self) -> Result<Vec<InstalledPackage>, ClientError> {
    Ok(self.installed.lock().unwrap().clone())
  }

  async fn install(&self, attribute: &str) -> Result<(), ClientError> {
    self.installs.lock().unwrap().push(attribute.to_string());
    Ok(())
  }
}

pub struct FakeKv {
  pub base: PathBuf,
  pub data: Mutex<BTreeMap<String, Map<String, Value>>>,
}

impl FakeKv {
  pub fn insert(&self, path: &str, value: Value) {
    if let Value::Object(map) = value {
      self.data.lock().unwrap().insert(path.to_string(), map);
    }
  }
}

#[async_trait]
impl KvStorage for FakeKv {
  fn encrypted_data_path(&self) -> &Path {
    &self.base
  }

  async fn get(&self, path: &str) -> Result<Map<String, Value>, ClientError> {
    self
      .data
      .lock()
      .unwrap()
      .get(path)
      .cloned()
      .ok_or_else(|| ClientError::Io {
        op: "read",
        path: path.to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
      })
  }
}

/// Handles on the fakes wired into a context.
#[derive(Clone)]
pub struct Fakes {
  pub container: Arc<FakeContainer>,
  pub cluster: Arc<FakeCluster>,
  pub packages: Arc<FakePackages>,
  pub kv: Arc<FakeKv>,
}

/// An action context over fresh fakes; the KV base is `<home>/kv`.
pub fn context(home: &Path) -> (ActionContext, Fakes) {
  let fakes = Fakes {
    container: Arc::new(FakeContainer::default()),
    cluster: Arc::new(FakeCluster::default()),
    packages: Arc::new(FakePackages::default()),
    kv: Arc::new(FakeKv {
      base: home.join("kv"),
      data: Mutex::default(),
    }),
  };
  let ctx = ActionContext {
    home: home.to_path_buf(),
    namespace: "test-ns".to_string(),
    clients: Clients {
      container: fakes.container.clone(),
      cluster: fakes.cluster.clone(),
      packages: fakes.packages.clone(),
      kv: Some(fakes.kv.clone()),
    },
    control_plane: None,
    cancel: CancellationToken::new(),
  };
  (ctx, fakes)
}
