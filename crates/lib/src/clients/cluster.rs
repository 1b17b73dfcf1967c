//! Cluster contract and the `kubectl` implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{ClientError, run_captured, run_inherited};

/// Terminal state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
  Succeeded,
  Failed,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait]
pub trait ClusterClient: Send + Sync {
  /// Create `namespace` unless it already exists.
  async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClientError>;

  async fn apply(&self, namespace: &str, manifest: &Path) -> Result<(), ClientError>;

  async fn delete(&self, namespace: &str, manifest: &Path) -> Result<(), ClientError>;

  /// `kind/name` of every Deployment, DaemonSet and StatefulSet matching `selector`.
  async fn find_workloads(&self, namespace: &str, selector: &str) -> Result<Vec<String>, ClientError>;

  /// Block until the rollout of `resource` completes.
  async fn rollout_status(&self, namespace: &str, resource: &str, timeout: Duration) -> Result<(), ClientError>;

  /// Name of a running pod owned by `<resource_type>/<resource_name>`.
  async fn resolve_pod(
    &self,
    namespace: &str,
    resource_type: &str,
    resource_name: &str,
    timeout: Duration,
  ) -> Result<String, ClientError>;

  /// Run `command` in the pod with stdio attached to this process.
  async fn exec(&self, namespace: &str, pod: &str, container: Option<&str>, command: &[String])
  -> Result<(), ClientError>;

  /// Follow the logs of the pods matching `selector` once one has started.
  async fn stream_logs(&self, namespace: &str, selector: &str, timeout: Duration) -> Result<(), ClientError>;

  async fn wait_for_job(&self, namespace: &str, name: &str, timeout: Duration) -> Result<JobOutcome, ClientError>;
}

/// Drives the `kubectl` binary against an optional named context.
#[derive(Debug, Clone)]
pub struct Kubectl {
  program: String,
  context: Option<String>,
}

impl Kubectl {
  pub fn new(context: Option<String>) -> Self {
    Self {
      program: "kubectl".to_string(),
      context,
    }
  }

  /// Common leading arguments: context and namespace.
  fn args(&self, namespace: &str, rest: &[&str]) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(context) = &self.context {
      args.push("--context".to_string());
      args.push(context.clone());
    }
    if !namespace.is_empty() {
      args.push("-n".to_string());
      args.push(namespace.to_string());
    }
    args.extend(rest.iter().map(|s| s.to_string()));
    args
  }

  async fn get_json(&self, namespace: &str, rest: &[&str]) -> Result<Value, ClientError> {
    let mut full = rest.to_vec();
    full.extend(["-o", "json"]);
    let out = run_captured(&self.program, &self.args(namespace, &full), None).await?;
    serde_json::from_str(&out).map_err(|e| ClientError::Decode {
      service: "kubectl",
      message: e.to_string(),
    })
  }

  async fn pod_selector(&self, namespace: &str, resource_type: &str, resource_name: &str) -> Result<String, ClientError> {
    let object = self.get_json(namespace, &["get", resource_type, resource_name]).await?;
    let labels = object
      .pointer("/spec/selector/matchLabels")
      .and_then(Value::as_object)
      .ok_or_else(|| ClientError::Decode {
        service: "kubectl",
        message: format!("{resource_type}/{resource_name} has no pod selector"),
      })?;
    Ok(selector_from_labels(labels))
  }
}

/// `k1=v1,k2=v2` in key order.
pub fn selector_from_labels(labels: &serde_json::Map<String, Value>) -> String {
  let mut pairs: Vec<String> = labels
    .iter()
    .map(|(k, v)| format!("{k}={}", v.as_str().unwrap_or_default()))
    .collect();
  pairs.sort();
  pairs.join(",")
}

/// First pod in a `kubectl get pods -o json` list whose phase is in `phases`.
fn pod_in_phase(list: &Value, phases: &[&str]) -> Option<String> {
  list
    .get("items")?
    .as_array()?
    .iter()
    .find(|pod| {
      pod
        .pointer("/status/phase")
        .and_then(Value::as_str)
        .is_some_and(|p| phases.contains(&p))
    })
    .and_then(|pod| pod.pointer("/metadata/name"))
    .and_then(Value::as_str)
    .map(str::to_string)
}

fn job_outcome(job: &Value) -> Option<JobOutcome> {
  let count = |field: &str| job.pointer(&format!("/status/{field}")).and_then(Value::as_u64).unwrap_or(0);
  if count("succeeded") > 0 {
    Some(JobOutcome::Succeeded)
  } else if count("failed") > 0 {
    Some(JobOutcome::Failed)
  } else {
    None
  }
}

#[async_trait]
impl ClusterClient for Kubectl {
  async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClientError> {
    let exists = run_captured(&self.program, &self.args("", &["get", "namespace", namespace]), None).await;
    match exists {
      Ok(_) => Ok(()),
      Err(ClientError::CmdFailed { .. }) => {
        info!(namespace, "creating namespace");
        run_captured(&self.program, &self.args("", &["create", "namespace", namespace]), None).await?;
        Ok(())
      }
      Err(e) => Err(e),
    }
  }

  async fn apply(&self, namespace: &str, manifest: &Path) -> Result<(), ClientError> {
    let path = manifest.to_string_lossy();
    let out = run_captured(&self.program, &self.args(namespace, &["apply", "-f", &path]), None).await?;
    debug!(output = %out, "applied manifest");
    Ok(())
  }

  async fn delete(&self, namespace: &str, manifest: &Path) -> Result<(), ClientError> {
    let path = manifest.to_string_lossy();
    run_captured(
      &self.program,
      &self.args(namespace, &["delete", "--ignore-not-found", "-f", &path]),
      None,
    )
    .await?;
    Ok(())
  }

  async fn find_workloads(&self, namespace: &str, selector: &str) -> Result<Vec<String>, ClientError> {
    let out = run_captured(
      &self.program,
      &self.args(
        namespace,
        &["get", "deployments,daemonsets,statefulsets", "-l", selector, "-o", "name"],
      ),
      None,
    )
    .await?;
    Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
  }

  async fn rollout_status(&self, namespace: &str, resource: &str, timeout: Duration) -> Result<(), ClientError> {
    let timeout_arg = format!("--timeout={}s", timeout.as_secs());
    run_captured(
      &self.program,
      &self.args(namespace, &["rollout", "status", resource, &timeout_arg]),
      None,
    )
    .await?;
    info!(resource, "rollout complete");
    Ok(())
  }

  async fn resolve_pod(
    &self,
    namespace: &str,
    resource_type: &str,
    resource_name: &str,
    timeout: Duration,
  ) -> Result<String, ClientError> {
    if matches!(resource_type, "pod" | "pods" | "po") {
      return Ok(resource_name.to_string());
    }
    let what = format!("{resource_type}/{resource_name}");
    let lookup = async {
      let selector = self.pod_selector(namespace, resource_type, resource_name).await?;
      loop {
        let pods = self.get_json(namespace, &["get", "pods", "-l", &selector]).await?;
        if let Some(pod) = pod_in_phase(&pods, &["Running"]) {
          return Ok::<_, ClientError>(pod);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
      }
    };
    tokio::time::timeout(timeout, lookup).await.map_err(|_| ClientError::Timeout {
      what,
      seconds: timeout.as_secs(),
    })?
  }

  async fn exec(
    &self,
    namespace: &str,
    pod: &str,
    container: Option<&str>,
    command: &[String],
  ) -> Result<(), ClientError> {
    let mut args = self.args(namespace, &["exec", pod]);
    if let Some(container) = container {
      args.push("-c".to_string());
      args.push(container.to_string());
    }
    args.push("--".to_string());
    args.extend(command.iter().cloned());
    run_inherited(&self.program, &args).await
  }

  async fn stream_logs(&self, namespace: &str, selector: &str, timeout: Duration) -> Result<(), ClientError> {
    let started = async {
      loop {
        let pods = self.get_json(namespace, &["get", "pods", "-l", selector]).await?;
        if pod_in_phase(&pods, &["Running", "Succeeded", "Failed"]).is_some() {
          return Ok::<_, ClientError>(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
      }
    };
    tokio::time::timeout(timeout, started).await.map_err(|_| ClientError::Timeout {
      what: format!("pods matching {selector}"),
      seconds: timeout.as_secs(),
    })??;

    run_inherited(
      &self.program,
      &self.args(namespace, &["logs", "-f", "--all-containers", "-l", selector]),
    )
    .await
  }

  async fn wait_for_job(&self, namespace: &str, name: &str, timeout: Duration) -> Result<JobOutcome, ClientError> {
    let watch = async {
      loop {
        let job = self.get_json(namespace, &["get", "job", name]).await?;
        if let Some(outcome) = job_outcome(&job) {
          return Ok::<_, ClientError>(outcome);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
      }
    };
    tokio::time::timeout(timeout, watch).await.map_err(|_| ClientError::Timeout {
      what: format!("job/{name}"),
      seconds: timeout.as_secs(),
    })?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn args_carry_context_and_namespace() {
    let k = Kubectl::new(Some("dev".into()));
    assert_eq!(
      k.args("apps", &["apply", "-f", "m.yaml"]),
      vec!["--context", "dev", "-n", "apps", "apply", "-f", "m.yaml"]
    );
    let k = Kubectl::new(None);
    assert_eq!(k.args("", &["get", "ns"]), vec!["get", "ns"]);
  }

  #[test]
  fn selector_is_sorted() {
    let labels = json!({"tier": "web", "app": "api"});
    assert_eq!(selector_from_labels(labels.as_object().unwrap()), "app=api,tier=web");
  }

  #[test]
  fn picks_first_pod_in_phase() {
    let list = json!({"items": [
      {"metadata": {"name": "a"}, "status": {"phase": "Pending"}},
      {"metadata": {"name": "b"}, "status": {"phase": "Running"}},
    ]});
    assert_eq!(pod_in_phase(&list, &["Running"]).as_deref(), Some("b"));
    assert_eq!(pod_in_phase(&list, &["Failed"]), None);
  }

  #[test]
  fn job_status_maps_to_outcome() {
    assert_eq!(job_outcome(&json!({"status": {"succeeded": 1}})), Some(JobOutcome::Succeeded));
    assert_eq!(job_outcome(&json!({"status": {"failed": 1}})), Some(JobOutcome::Failed));
    assert_eq!(job_outcome(&json!({"status": {"active": 1}})), None);
  }
}
