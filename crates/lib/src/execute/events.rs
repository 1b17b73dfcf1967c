//! Run events.
//!
//! Every run publishes its progress on an unbounded channel. A subscriber
//! receives the run id up front and then every event until `Finished`.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::{ExecuteError, RunSummary};
use crate::dag::Dag;
use crate::targets::Derivation;

/// The vertex an event is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VertexInfo {
  pub key: String,
  #[serde(rename = "type")]
  pub kind: String,
  /// Artifact hash; empty until the vertex is derived.
  pub hash: String,
}

impl From<&Derivation> for VertexInfo {
  fn from(d: &Derivation) -> Self {
    Self {
      key: d.key().to_string(),
      kind: d.target.kind.clone(),
      hash: d.hash().to_string(),
    }
  }
}

/// Vertices and edges of the graph a run walks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
  pub vertices: Vec<String>,
  pub edges: Vec<(String, String)>,
}

impl From<&Dag> for GraphSnapshot {
  fn from(dag: &Dag) -> Self {
    Self {
      vertices: dag.vertices().map(str::to_string).collect(),
      edges: dag.edges().map(|(s, d)| (s.to_string(), d.to_string())).collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
  Started { run_id: Uuid, graph: GraphSnapshot },
  DerivationComputed(VertexInfo),
  ActionCached(VertexInfo),
  ArtifactPulled(VertexInfo),
  ActionStarted(VertexInfo),
  ArtifactPushStarted(VertexInfo),
  ActionSuccess(VertexInfo),
  Failed { vertex: VertexInfo, error: String },
  Skipped { key: String, failed_dependency: String },
  Finished { summary: RunSummary },
}

impl RunEvent {
  /// Key of the vertex the event is about, if any.
  pub fn key(&self) -> Option<&str> {
    match self {
      RunEvent::DerivationComputed(v)
      | RunEvent::ActionCached(v)
      | RunEvent::ArtifactPulled(v)
      | RunEvent::ActionStarted(v)
      | RunEvent::ArtifactPushStarted(v)
      | RunEvent::ActionSuccess(v)
      | RunEvent::Failed { vertex: v, .. } => Some(&v.key),
      RunEvent::Skipped { key, .. } => Some(key),
      RunEvent::Started { .. } | RunEvent::Finished { .. } => None,
    }
  }
}

/// Publishing side of a run's event stream. A sink without a subscriber,
/// or whose subscriber went away, drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
  tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx: Some(tx) }, rx)
  }

  /// A sink that discards everything.
  pub fn discard() -> Self {
    Self::default()
  }

  pub fn emit(&self, event: RunEvent) {
    if let Some(tx) = &self.tx {
      let _ = tx.send(event);
    }
  }
}

/// A run in progress.
#[derive(Debug)]
pub struct RunHandle {
  /// Subscription id; also the summary's `run_id`.
  pub id: Uuid,
  pub events: mpsc::UnboundedReceiver<RunEvent>,
  pub task: JoinHandle<Result<RunSummary, ExecuteError>>,
}

impl RunHandle {
  /// Wait for the run to end.
  pub async fn wait(self) -> Result<RunSummary, ExecuteError> {
    self.task.await.map_err(|e| ExecuteError::Events(e.to_string()))?
  }
}
