//! Target and edge storage.
//!
//! A [`Store`] persists targets (upserted by key) and the edges between
//! them, and rebuilds the dependency graph from both on demand. Adding a
//! target also records an edge to each of its declared ancestors and returns
//! the artifact it currently derives to.
//!
//! Two backends are provided: [`MemoryStore`] for a single process and
//! [`SqliteStore`] for a workspace database.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::Artifact;
use crate::dag::{Dag, DagError};
use crate::target::{Target, TargetError};
use crate::targets::TargetTypeError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("target not found: {0}")]
  NotFound(String),

  #[error(transparent)]
  Target(#[from] TargetError),

  #[error(transparent)]
  TargetType(#[from] TargetTypeError),

  #[error(transparent)]
  Dag(#[from] DagError),

  #[error("store is not open")]
  NotOpen,

  #[error("database error: {0}")]
  Database(String),

  #[error("corrupt record {key}: {message}")]
  Corrupt { key: String, message: String },
}

/// A dependency edge: `src` depends on `dst`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
  pub src: String,
  pub dst: String,
}

impl GraphEdge {
  pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
    Self {
      src: src.into(),
      dst: dst.into(),
    }
  }

  /// `<src>:<dst>`, unique per edge.
  pub fn key(&self) -> String {
    format!("{}:{}", self.src, self.dst)
  }

  pub fn validate(&self) -> Result<(), TargetError> {
    if self.src.is_empty() {
      return Err(TargetError::validation("src", "must not be empty"));
    }
    if self.dst.is_empty() {
      return Err(TargetError::validation("dst", "must not be empty"));
    }
    Ok(())
  }
}

#[async_trait]
pub trait Store: Send + Sync {
  /// Connect to the backing storage. A no-op for in-memory stores.
  async fn open(&self, connection: &str) -> Result<(), StorageError>;

  /// Create or upgrade the schema. A no-op for in-memory stores.
  async fn migrate(&self) -> Result<(), StorageError>;

  /// Every stored target, ordered by key.
  async fn get_targets(&self) -> Result<Vec<Target>, StorageError>;

  async fn get_target_by_key(&self, key: &str) -> Result<Target, StorageError>;

  /// Validate and upsert `target`, connect it to its ancestors and return
  /// the artifact it derives to.
  async fn add_target(&self, target: Target) -> Result<Artifact, StorageError>;

  async fn connect_targets(&self, edge: GraphEdge) -> Result<(), StorageError>;

  /// Every stored edge, ordered by key.
  async fn get_graph_edges(&self) -> Result<Vec<GraphEdge>, StorageError>;

  async fn get_graph(&self) -> Result<Dag, StorageError> {
    let targets = self.get_targets().await?;
    let edges = self.get_graph_edges().await?;
    Ok(build_graph(&targets, &edges)?)
  }
}

/// A graph over `targets` connected by `edges`.
///
/// Fails with [`DagError::DanglingEdge`] when an edge names a missing target.
pub fn build_graph(targets: &[Target], edges: &[GraphEdge]) -> Result<Dag, DagError> {
  let mut dag = Dag::new();
  for target in targets {
    dag.add(target.key());
  }
  for edge in edges {
    if !dag.has_vertex(&edge.src) || !dag.has_vertex(&edge.dst) {
      return Err(DagError::DanglingEdge {
        src: edge.src.clone(),
        dst: edge.dst.clone(),
      });
    }
    dag.connect(edge.src.as_str(), edge.dst.as_str());
  }
  Ok(dag)
}

/// Edges implied by a target's declared ancestors.
pub(crate) fn ancestor_edges(target: &Target) -> Vec<GraphEdge> {
  let key = target.key();
  target
    .depends_on
    .iter()
    .map(|dep| GraphEdge::new(key.clone(), dep.key.clone()))
    .collect()
}
