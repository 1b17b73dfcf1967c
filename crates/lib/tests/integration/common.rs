//! Shared helpers: recording clients and target builders.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use ark_lib::clients::{
  BuildRequest, ClientError, Clients, ClusterClient, ContainerRuntime, InstalledPackage, JobOutcome, PackageManager,
};
use ark_lib::execute::{EventSink, Executor, RunEvent, RunOptions, RunSummary};
use ark_lib::target::{DependsOn, Target};
use tokio_util::sync::CancellationToken;

/// Image store split into a local daemon and a registry.
#[derive(Default)]
pub struct Registry {
  pub local: Mutex<BTreeSet<String>>,
  pub remote: Mutex<BTreeSet<String>>,
  pub built: Mutex<Vec<String>>,
  pub pushed: Mutex<Vec<String>>,
  pub pulled: Mutex<Vec<String>>,
}

impl Registry {
  pub fn built(&self) -> Vec<String> {
    self.built.lock().unwrap().clone()
  }

  pub fn pushed(&self) -> Vec<String> {
    self.pushed.lock().unwrap().clone()
  }

  pub fn pulled(&self) -> Vec<String> {
    self.pulled.lock().unwrap().clone()
  }

  /// Forget every locally built or pulled image, as on a fresh machine.
  pub fn wipe_local(&self) {
    self.local.lock().unwrap().clear();
  }
}

#[async_trait]
impl ContainerRuntime for Registry {
  async fn image_exists(&self, url: &str) -> Result<bool, ClientError> {
    Ok(self.local.lock().unwrap().contains(url))
  }

  async fn repo_image_exists(&self, url: &str) -> Result<bool, ClientError> {
    Ok(self.remote.lock().unwrap().contains(url))
  }

  async fn push_image(&self, url: &str) -> Result<(), ClientError> {
    self.pushed.lock().unwrap().push(url.to_string());
    self.remote.lock().unwrap().insert(url.to_string());
    Ok(())
  }

  async fn pull_image(&self, url: &str) -> Result<(), ClientError> {
    self.pulled.lock().unwrap().push(url.to_string());
    self.local.lock().unwrap().insert(url.to_string());
    Ok(())
  }

  async fn build_image(&self, request: BuildRequest) -> Result<(), ClientError> {
    self.local.lock().unwrap().extend(request.tags.iter().cloned());
    self.built.lock().unwrap().push(request.tags[0].clone());
    Ok(())
  }
}

/// Records the manifests applied to each namespace.
#[derive(Default)]
pub struct Cluster {
  pub applied: Mutex<Vec<(String, String)>>,
}

impl Cluster {
  pub fn applied(&self) -> Vec<(String, String)> {
    self.applied.lock().unwrap().clone()
  }
}

#[async_trait]
impl ClusterClient for Cluster {
  async fn ensure_namespace(&self, _namespace: &str) -> Result<(), ClientError> {
    Ok(())
  }

  async fn apply(&self, namespace: &str, manifest: &Path) -> Result<(), ClientError> {
    let content = std::fs::read_to_string(manifest).unwrap_or_default();
    self.applied.lock().unwrap().push((namespace.to_string(), content));
    Ok(())
  }

  async fn delete(&self, _namespace: &str, _manifest: &Path) -> Result<(), ClientError> {
    Ok(())
  }

  async fn find_workloads(&self, _namespace: &str, _selector: &str) -> Result<Vec<String>, ClientError> {
    Ok(vec![])
  }

  async fn rollout_status(&self, _namespace: &str, _resource: &str, _timeout: Duration) -> Result<(), ClientError> {
    Ok(())
  }

  async fn resolve_pod(&self, _: &str, _: &str, name: &str, _: Duration) -> Result<String, ClientError> {
    Ok(format!("{name}-0"))
  }

  async fn exec(&self, _: &str, _: &str, _: Option<&str>, _: &[String]) -> Result<(), ClientError> {
    Ok(())
  }

  async fn stream_logs(&self, _: &str, _: &str, _: Duration) -> Result<(), ClientError> {
    Ok(())
  }

  async fn wait_for_job(&self, _: &str, _: &str, _: Duration) -> Result<JobOutcome, ClientError> {
    Ok(JobOutcome::Succeeded)
  }
}

pub struct NoPackages;

#[async_trait]
impl PackageManager for NoPackages {
  async fn installed(&self) -> Result<Vec<InstalledPackage>, ClientError> {
    Ok(vec![])
  }

  async fn install(&self, _attribute: &str) -> Result<(), ClientError> {
    Err(ClientError::NotConfigured("nix-env"))
  }
}

pub struct Recorders {
  pub registry: Arc<Registry>,
  pub cluster: Arc<Cluster>,
}

pub fn clients() -> (Clients, Recorders) {
  let registry = Arc::new(Registry::default());
  let cluster = Arc::new(Cluster::default());
  let clients = Clients {
    container: registry.clone(),
    cluster: cluster.clone(),
    packages: Arc::new(NoPackages),
    kv: None,
  };
  (clients, Recorders { registry, cluster })
}

/// A target declared in `<realm>/BUILD.hcl`.
pub fn target(realm: &Path, name: &str, kind: &str, attributes: Value) -> Target {
  let Value::Object(attributes) = attributes else {
    panic!("attributes must be an object");
  };
  Target {
    name: name.to_string(),
    kind: kind.to_string(),
    file: realm.join("BUILD.hcl").to_string_lossy().into_owned(),
    realm: realm.to_string_lossy().into_owned(),
    attributes,
    ..Default::default()
  }
}

pub fn image(realm: &Path, name: &str, sources: &[&str]) -> Target {
  let mut t = target(
    realm,
    name,
    "docker_image",
    json!({"repo": format!("registry.local/{name}"), "dockerfile": "FROM scratch\nCOPY . /app"}),
  );
  t.source_files = sources.iter().map(|s| s.to_string()).collect();
  t
}

pub fn deploy(realm: &Path, name: &str, depends_on: &[&str]) -> Target {
  let mut t = target(
    realm,
    name,
    "deploy",
    json!({"manifest": format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n")}),
  );
  t.depends_on = depends_on
    .iter()
    .map(|k| DependsOn {
      key: k.to_string(),
      hash: String::new(),
    })
    .collect();
  t
}

/// Run to completion, collecting every event.
pub async fn run(executor: &Executor, options: RunOptions) -> (RunSummary, Vec<RunEvent>) {
  let (sink, mut rx) = EventSink::channel();
  let summary = executor
    .execute(uuid::Uuid::new_v4(), &options, CancellationToken::new(), &sink)
    .await
    .unwrap();
  drop(sink);
  let mut events = Vec::new();
  while let Some(event) = rx.recv().await {
    events.push(event);
  }
  (summary, events)
}

/// Hash reported for `key` by its success event.
pub fn success_hash(events: &[RunEvent], key: &str) -> String {
  events
    .iter()
    .find_map(|e| match e {
      RunEvent::ActionSuccess(v) if v.key == key => Some(v.hash.clone()),
      _ => None,
    })
    .unwrap_or_else(|| panic!("no success event for {key}"))
}
