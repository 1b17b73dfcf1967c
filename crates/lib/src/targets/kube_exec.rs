//! `kube_exec`: run a command inside a pod of a workload.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::{ActionContext, ActionError, required};
use crate::target::TargetError;

pub const TYPE: &str = "kube_exec";

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeExec {
  /// `deployment`, `statefulset`, `daemonset`, `pod`...
  #[serde(default)]
  pub resource_type: String,
  #[serde(default)]
  pub resource_name: String,
  #[serde(default)]
  pub container_name: String,
  #[serde(default)]
  pub command: Vec<String>,
  /// Time allowed to find a running pod.
  #[serde(default)]
  pub timeout_seconds: u64,
}

impl KubeExec {
  pub fn validate(&self) -> Result<(), TargetError> {
    required("resourceType", &self.resource_type)?;
    required("resourceName", &self.resource_name)?;
    if self.command.is_empty() {
      return Err(TargetError::validation("command", "is required"));
    }
    Ok(())
  }

  pub fn timeout(&self) -> Duration {
    match self.timeout_seconds {
      0 => Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
      s => Duration::from_secs(s),
    }
  }

  pub async fn execute(&self, ctx: &ActionContext) -> Result<(), ActionError> {
    let cluster = &ctx.clients.cluster;
    let pod = tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => return Err(ActionError::Cancelled),
      pod = cluster.resolve_pod(&ctx.namespace, &self.resource_type, &self.resource_name, self.timeout()) => pod?,
    };

    let container = Some(self.container_name.as_str()).filter(|c| !c.is_empty());
    info!(pod = %pod, container = ?container, command = ?self.command, "exec in pod");
    tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
      res = cluster.exec(&ctx.namespace, &pod, container, &self.command) => Ok(res?),
    }
  }
}
