//! `test`: run a command to completion as a one-shot cluster job.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::deploy::{MANIFEST_FILE, TARGET_KEY_LABEL};
use super::{ActionContext, ActionError, required};
use crate::artifact::Artifact;
use crate::clients::JobOutcome;
use crate::target::{Target, TargetError};

pub const TYPE: &str = "test";

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
const JOB_NAME_LEN: usize = 12;
const JOB_NAME_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// Grace period before the finished job is deleted.
const CLEANUP_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestJob {
  #[serde(default)]
  pub command: Vec<String>,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub image: String,
  #[serde(default)]
  pub environment: BTreeMap<String, String>,
  #[serde(default)]
  pub working_directory: String,
  #[serde(default)]
  pub timeout_seconds: u64,
  #[serde(default)]
  pub disable_cleanup: bool,
}

/// 12 random lowercase alphanumerics.
pub fn job_name() -> String {
  let mut rng = rand::thread_rng();
  (0..JOB_NAME_LEN)
    .map(|_| JOB_NAME_CHARSET[rng.gen_range(0..JOB_NAME_CHARSET.len())] as char)
    .collect()
}

/// Container names must be DNS labels.
fn container_name(target_name: &str) -> String {
  target_name
    .to_ascii_lowercase()
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
    .collect()
}

impl TestJob {
  pub fn validate(&self) -> Result<(), TargetError> {
    if self.command.is_empty() {
      return Err(TargetError::validation("command", "is required"));
    }
    if self.args.is_empty() {
      return Err(TargetError::validation("args", "is required"));
    }
    required("image", &self.image)
  }

  pub fn timeout_seconds(&self) -> u64 {
    if self.timeout_seconds == 0 {
      DEFAULT_TIMEOUT_SECONDS
    } else {
      self.timeout_seconds
    }
  }

  /// The batch job running this test under `name`.
  pub fn job_manifest(&self, name: &str, target: &Target) -> Value {
    let labels = json!({ TARGET_KEY_LABEL: target.key_hash() });
    let env: Vec<Value> = self
      .environment
      .iter()
      .map(|(k, v)| json!({"name": k, "value": v}))
      .collect();

    let mut container = json!({
      "name": container_name(&target.name),
      "image": self.image,
      "command": self.command,
      "args": self.args,
      "env": env,
    });
    if !self.working_directory.is_empty() {
      container["workingDir"] = json!(self.working_directory);
    }

    json!({
      "apiVersion": "batch/v1",
      "kind": "Job",
      "metadata": {"name": name, "labels": labels},
      "spec": {
        "backoffLimit": 0,
        "activeDeadlineSeconds": self.timeout_seconds(),
        "template": {
          "metadata": {"labels": labels},
          "spec": {
            "restartPolicy": "Never",
            "containers": [container],
          },
        },
      },
    })
  }

  async fn follow(&self, name: &str, ctx: &ActionContext) -> Result<(), ActionError> {
    let cluster = &ctx.clients.cluster;
    let timeout = Duration::from_secs(self.timeout_seconds());
    if let Err(e) = cluster.stream_logs(&ctx.namespace, &format!("job-name={name}"), timeout).await {
      warn!(job = %name, error = %e, "log stream ended early");
    }
    match cluster.wait_for_job(&ctx.namespace, name, timeout).await? {
      JobOutcome::Succeeded => Ok(()),
      JobOutcome::Failed => Err(ActionError::Failed("The job execution failed".to_string())),
    }
  }

  pub async fn execute(&self, target: &Target, artifact: &Artifact, ctx: &ActionContext) -> Result<(), ActionError> {
    let name = job_name();
    let manifest = serde_yaml::to_string(&self.job_manifest(&name, target))
      .map_err(|e| ActionError::Manifest(e.to_string()))?;
    let path = artifact.mk_cache_dir(&ctx.home)?.join(MANIFEST_FILE);
    tokio::fs::write(&path, manifest)
      .await
      .map_err(ActionError::io("write", &path))?;

    let cluster = &ctx.clients.cluster;
    cluster.apply(&ctx.namespace, &path).await?;
    info!(job = %name, image = %self.image, "started test job");

    let result = tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
      res = self.follow(&name, ctx) => res,
    };

    if !self.disable_cleanup {
      tokio::time::sleep(CLEANUP_DELAY).await;
      if let Err(e) = cluster.delete(&ctx.namespace, &path).await {
        warn!(job = %name, error = %e, "failed to delete test job");
      }
    }
    result
  }
}
