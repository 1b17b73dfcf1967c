//! Process-local store backed by concurrent maps.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{GraphEdge, StorageError, Store, ancestor_edges};
use crate::artifact::{Artifact, CacheConfig};
use crate::target::Target;
use crate::targets::derive;

#[derive(Debug, Default)]
pub struct MemoryStore {
  cache: CacheConfig,
  targets: DashMap<String, Target>,
  edges: DashMap<String, GraphEdge>,
}

impl MemoryStore {
  /// `cache` anchors the artifacts returned by [`Store::add_target`].
  pub fn new(cache: CacheConfig) -> Self {
    Self {
      cache,
      targets: DashMap::new(),
      edges: DashMap::new(),
    }
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn open(&self, _connection: &str) -> Result<(), StorageError> {
    Ok(())
  }

  async fn migrate(&self) -> Result<(), StorageError> {
    Ok(())
  }

  async fn get_targets(&self) -> Result<Vec<Target>, StorageError> {
    let mut targets: Vec<Target> = self.targets.iter().map(|e| e.value().clone()).collect();
    targets.sort_by_key(Target::key);
    Ok(targets)
  }

  async fn get_target_by_key(&self, key: &str) -> Result<Target, StorageError> {
    self
      .targets
      .get(key)
      .map(|e| e.value().clone())
      .ok_or_else(|| StorageError::NotFound(key.to_string()))
  }

  async fn add_target(&self, target: Target) -> Result<Artifact, StorageError> {
    target.validate()?;
    let derivation = derive(&target, &self.cache)?;
    for edge in ancestor_edges(&target) {
      self.connect_targets(edge).await?;
    }
    debug!(target_key = %derivation.key(), "stored target");
    self.targets.insert(target.key(), target);
    Ok(derivation.artifact)
  }

  async fn connect_targets(&self, edge: GraphEdge) -> Result<(), StorageError> {
    edge.validate()?;
    self.edges.insert(edge.key(), edge);
    Ok(())
  }

  async fn get_graph_edges(&self) -> Result<Vec<GraphEdge>, StorageError> {
    let mut edges: Vec<GraphEdge> = self.edges.iter().map(|e| e.value().clone()).collect();
    edges.sort();
    Ok(edges)
  }
}
