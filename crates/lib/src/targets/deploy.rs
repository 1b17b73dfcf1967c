//! `deploy`: apply a Kubernetes manifest and wait for its workloads.
//!
//! The manifest is a multi-document YAML string. Before it is applied every
//! object is stamped with the owning target's key hash and the live-sync and
//! port-binding flags, so the workloads it creates can be found again by
//! label. Workload pod templates (Deployment, DaemonSet, StatefulSet) get the
//! same labels and annotations, plus environment variables.
//!
//! The rendered manifest is written to `<cacheDir>/manifest.yaml`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{ActionContext, ActionError, required};
use crate::artifact::Artifact;
use crate::target::{Target, TargetError};

pub const TYPE: &str = "deploy";

pub const MANIFEST_FILE: &str = "manifest.yaml";

pub const TARGET_KEY_LABEL: &str = "ark.target.key";
pub const LIVE_SYNC_LABEL: &str = "ark.live.sync.enabled";
pub const PORT_BINDING_LABEL: &str = "ark.port.binding.enabled";
pub const PORT_BINDING_ANNOTATION: &str = "ark.port.binding";

/// Binding added for the in-container entrypoint when live sync is on.
pub const ENTRYPOINT_BINDING: &str = "ark_grpc_entrypoint";
const ENTRYPOINT_REMOTE_PORT: &str = "9000";

const ROLLOUT_TIMEOUT: Duration = Duration::from_secs(900);

const WORKLOAD_KINDS: [&str; 3] = ["Deployment", "DaemonSet", "StatefulSet"];

/// A local and remote port pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
  #[serde(rename = "HostPort", alias = "hostPort", default)]
  pub host_port: String,
  #[serde(rename = "RemotePort", alias = "remotePort", default)]
  pub remote_port: String,
}

pub type PortMap = BTreeMap<String, Binding>;

/// Commands run in the workload when a changed file matches `patterns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSyncStep {
  #[serde(default, alias = "manifest")]
  pub command: Vec<String>,
  #[serde(default)]
  pub work_dir: String,
  #[serde(default)]
  pub patterns: Vec<String>,
}

/// Control-plane settings exposed to deployed workloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPlaneEnv {
  pub event_sink_url: String,
  pub log_sink_url: String,
  pub user_token: String,
  pub org_id: String,
  pub project_id: String,
}

impl ControlPlaneEnv {
  pub fn vars(&self) -> [(&'static str, &str); 5] {
    [
      ("ARK_EVENT_SINK_URL", self.event_sink_url.as_str()),
      ("ARK_LOG_SINK_URL", self.log_sink_url.as_str()),
      ("ARK_USER_TOKEN", self.user_token.as_str()),
      ("ARK_ORG_ID", self.org_id.as_str()),
      ("ARK_PROJECT_ID", self.project_id.as_str()),
    ]
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deploy {
  #[serde(default)]
  pub manifest: String,
  #[serde(default)]
  pub port_forward: PortMap,
  #[serde(default)]
  pub live_sync_enabled: bool,
  #[serde(default)]
  pub live_sync_restart_mode: String,
  #[serde(default)]
  pub live_sync_on_step: Vec<LiveSyncStep>,
  /// Extra container environment, one `{name: value}` map per entry.
  #[serde(default)]
  pub env: Vec<BTreeMap<String, String>>,
}

/// Split a multi-document YAML string into JSON values, skipping empty documents.
pub fn parse_documents(manifest: &str) -> Result<Vec<Value>, String> {
  let mut docs = Vec::new();
  for (index, document) in serde_yaml::Deserializer::from_str(manifest).enumerate() {
    let value = Value::deserialize(document).map_err(|e| format!("document {index}: {e}"))?;
    match value {
      Value::Null => {}
      Value::Object(_) => docs.push(value),
      _ => return Err(format!("document {index} is not a mapping")),
    }
  }
  Ok(docs)
}

/// The map at `path` under `value`, creating empty maps along the way.
fn map_at<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Map<String, Value>> {
  let mut current = value;
  for segment in path {
    let next = current
      .as_object_mut()?
      .entry(segment.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if next.is_null() {
      *next = Value::Object(Map::new());
    }
    current = next;
  }
  current.as_object_mut()
}

fn is_workload(object: &Value) -> bool {
  object
    .get("kind")
    .and_then(Value::as_str)
    .is_some_and(|kind| WORKLOAD_KINDS.contains(&kind))
}

fn merge(target: Option<&mut Map<String, Value>>, entries: &Map<String, Value>) {
  if let Some(target) = target {
    target.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
  }
}

/// Append `vars` to the env of every container in a workload's pod template.
fn inject_env(object: &mut Value, vars: &[(String, String)]) {
  let Some(containers) = object
    .pointer_mut("/spec/template/spec/containers")
    .and_then(Value::as_array_mut)
  else {
    return;
  };
  for container in containers {
    let Some(container) = container.as_object_mut() else {
      continue;
    };
    let env = container.entry("env").or_insert_with(|| Value::Array(Vec::new()));
    if env.is_null() {
      *env = Value::Array(Vec::new());
    }
    let Some(env) = env.as_array_mut() else {
      continue;
    };
    for (name, value) in vars {
      env.retain(|e| e.get("name").and_then(Value::as_str) != Some(name.as_str()));
      env.push(json!({"name": name, "value": value}));
    }
  }
}

fn free_port() -> std::io::Result<u16> {
  let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
  Ok(listener.local_addr()?.port())
}

impl Deploy {
  pub fn validate(&self) -> Result<(), TargetError> {
    required("manifest", &self.manifest)?;
    parse_documents(&self.manifest).map_err(|e| TargetError::validation("manifest", e))?;
    if self.live_sync_on_step.iter().any(|s| s.command.is_empty()) {
      return Err(TargetError::validation("liveSyncOnStep", "every step needs a command"));
    }
    Ok(())
  }

  /// Declared port forwards plus the entrypoint binding when live sync is on.
  pub fn port_map(&self) -> Result<PortMap, ActionError> {
    let mut ports = self.port_forward.clone();
    if self.live_sync_enabled {
      let port = free_port().map_err(|e| ActionError::Failed(format!("finding a free port: {e}")))?;
      ports.insert(
        ENTRYPOINT_BINDING.to_string(),
        Binding {
          host_port: port.to_string(),
          remote_port: ENTRYPOINT_REMOTE_PORT.to_string(),
        },
      );
    }
    Ok(ports)
  }

  fn env_vars(&self, control_plane: Option<&ControlPlaneEnv>) -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = self
      .env
      .iter()
      .flat_map(|entry| entry.iter().map(|(k, v)| (k.clone(), v.clone())))
      .collect();
    if let Some(cp) = control_plane {
      vars.extend(cp.vars().iter().map(|(k, v)| (k.to_string(), v.to_string())));
    }
    vars
  }

  /// Stamp every document and serialize them back to YAML.
  pub fn render(
    &self,
    key_hash: &str,
    ports: &PortMap,
    control_plane: Option<&ControlPlaneEnv>,
  ) -> Result<String, ActionError> {
    let mut docs = parse_documents(&self.manifest).map_err(ActionError::Manifest)?;

    let mut labels = Map::new();
    labels.insert(TARGET_KEY_LABEL.to_string(), json!(key_hash));
    labels.insert(LIVE_SYNC_LABEL.to_string(), json!(self.live_sync_enabled.to_string()));
    labels.insert(PORT_BINDING_LABEL.to_string(), json!((!self.port_forward.is_empty()).to_string()));

    let mut annotations = Map::new();
    if !ports.is_empty() {
      let payload = serde_json::to_string(ports).map_err(|e| ActionError::Manifest(e.to_string()))?;
      annotations.insert(PORT_BINDING_ANNOTATION.to_string(), json!(payload));
    }

    let env = self.env_vars(control_plane);
    for doc in &mut docs {
      merge(map_at(doc, &["metadata", "labels"]), &labels);
      if !annotations.is_empty() {
        merge(map_at(doc, &["metadata", "annotations"]), &annotations);
      }
      if is_workload(doc) {
        merge(map_at(doc, &["spec", "template", "metadata", "labels"]), &labels);
        if !annotations.is_empty() {
          merge(map_at(doc, &["spec", "template", "metadata", "annotations"]), &annotations);
        }
        if !env.is_empty() {
          inject_env(doc, &env);
        }
      }
    }

    let rendered = docs
      .iter()
      .map(serde_yaml::to_string)
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| ActionError::Manifest(e.to_string()))?;
    Ok(rendered.join("---\n"))
  }

  pub async fn execute(&self, target: &Target, artifact: &Artifact, ctx: &ActionContext) -> Result<(), ActionError> {
    let key_hash = target.key_hash();
    let dir = artifact.mk_cache_dir(&ctx.home)?;
    let ports = self.port_map()?;
    let rendered = self.render(&key_hash, &ports, ctx.control_plane.as_ref())?;
    let path = dir.join(MANIFEST_FILE);
    tokio::fs::write(&path, rendered)
      .await
      .map_err(ActionError::io("write", &path))?;
    debug!(path = %path.display(), "rendered manifest");

    let cluster = &ctx.clients.cluster;
    if !ctx.namespace.is_empty() {
      cluster.ensure_namespace(&ctx.namespace).await?;
    }
    cluster.apply(&ctx.namespace, &path).await?;

    let selector = format!("{TARGET_KEY_LABEL}={key_hash}");
    let workloads = cluster.find_workloads(&ctx.namespace, &selector).await?;
    info!(target_key = %artifact.key, workloads = workloads.len(), "watching rollouts");

    let mut rollouts = JoinSet::new();
    for workload in workloads {
      let cluster = cluster.clone();
      let namespace = ctx.namespace.clone();
      rollouts.spawn(async move { cluster.rollout_status(&namespace, &workload, ROLLOUT_TIMEOUT).await });
    }

    let watch = async {
      while let Some(joined) = rollouts.join_next().await {
        joined.map_err(|e| ActionError::Failed(format!("rollout watcher aborted: {e}")))??;
      }
      Ok::<(), ActionError>(())
    };
    tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
      res = watch => res,
    }
  }
}
