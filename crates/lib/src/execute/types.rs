//! Options, errors and results for a run.

use std::collections::BTreeMap;
use std::thread::available_parallelism;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::dag::DagError;
use crate::observer::ObserverError;
use crate::storage::StorageError;
use crate::target::TargetError;
use crate::targets::{ActionError, TargetTypeError};

/// Per-invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
  /// Roots of the run; empty runs the whole graph.
  pub target_keys: Vec<String>,
  /// Ignore every cache and always run the action.
  pub force: bool,
  /// Fetch from the remote cache on a local miss.
  pub pull: bool,
  /// Upload artifacts missing from the remote cache.
  pub push: bool,
  /// Upper bound on concurrently executing vertices.
  pub max_concurrency: usize,
  /// Cluster namespace; required when the run contains a deploy.
  pub namespace: String,
  pub kube_context: Option<String>,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      target_keys: Vec::new(),
      force: false,
      pull: false,
      push: false,
      max_concurrency: default_concurrency(),
      namespace: String::new(),
      kube_context: None,
    }
  }
}

pub fn default_concurrency() -> usize {
  available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Errors that stop a run before or after its walk.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Dag(#[from] DagError),

  #[error(transparent)]
  Validation(#[from] TargetError),

  #[error(transparent)]
  TargetType(#[from] TargetTypeError),

  #[error(transparent)]
  Observer(#[from] ObserverError),

  #[error("{failed} target(s) failed, {skipped} skipped")]
  VerticesFailed { failed: usize, skipped: usize },

  #[error("run cancelled")]
  Cancelled,

  #[error("event stream closed: {0}")]
  Events(String),
}

/// Why one vertex failed.
#[derive(Debug, Error)]
pub enum VertexError {
  #[error(transparent)]
  Derive(#[from] TargetTypeError),

  #[error(transparent)]
  Action(#[from] ActionError),

  #[error("{0} is not part of the run")]
  Missing(String),

  #[error("task panicked: {0}")]
  Panicked(String),
}

/// How a successful vertex was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  /// The action ran.
  Built,
  /// The local cache already held the artifact.
  Cached,
  /// The artifact was fetched from the remote cache.
  Pulled,
}

/// The result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  pub run_id: Uuid,
  pub succeeded: BTreeMap<String, Outcome>,
  pub failed: BTreeMap<String, String>,
  /// Skipped vertex mapped to the failed dependency behind it.
  pub skipped: BTreeMap<String, String>,
  pub cancelled: Vec<String>,
}

impl RunSummary {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
  }

  pub fn count(&self, outcome: Outcome) -> usize {
    self.succeeded.values().filter(|o| **o == outcome).count()
  }

  /// Collapse the summary into an error when anything did not succeed.
  pub fn check(&self) -> Result<(), ExecuteError> {
    if !self.failed.is_empty() || !self.skipped.is_empty() {
      return Err(ExecuteError::VerticesFailed {
        failed: self.failed.len(),
        skipped: self.skipped.len(),
      });
    }
    if !self.cancelled.is_empty() {
      return Err(ExecuteError::Cancelled);
    }
    Ok(())
  }
}
