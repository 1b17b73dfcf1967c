//! Directed acyclic graph of targets.
//!
//! Vertices are target keys. An edge `src -> dst` means `src` depends on
//! `dst`, so "down" edges point at dependencies and leaves are targets with
//! nothing left to wait on. Orderings are deterministic: whenever a choice
//! exists, vertices are visited by name.

mod walk;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use thiserror::Error;

pub use walk::{WalkResult, walk};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
  #[error("dependency cycle detected: {}", format_cycles(.cycles))]
  CycleDetected { cycles: Vec<Vec<String>> },

  #[error("edge {src} -> {dst} references a missing target")]
  DanglingEdge { src: String, dst: String },

  #[error("target not found in graph: {0}")]
  VertexNotFound(String),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
  cycles
    .iter()
    .map(|c| c.join(", "))
    .collect::<Vec<_>>()
    .join("; ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dag {
  vertices: BTreeSet<String>,
  down: BTreeMap<String, BTreeSet<String>>,
  up: BTreeMap<String, BTreeSet<String>>,
}

impl Dag {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a vertex. Adding an existing vertex is a no-op.
  pub fn add(&mut self, v: impl Into<String>) {
    self.vertices.insert(v.into());
  }

  /// Add the edge `src -> dst`. Does not add the endpoints.
  pub fn connect(&mut self, src: impl Into<String>, dst: impl Into<String>) {
    let (src, dst) = (src.into(), dst.into());
    self.up.entry(dst.clone()).or_default().insert(src.clone());
    self.down.entry(src).or_default().insert(dst);
  }

  pub fn remove_edge(&mut self, src: &str, dst: &str) {
    if let Some(targets) = self.down.get_mut(src) {
      targets.remove(dst);
    }
    if let Some(sources) = self.up.get_mut(dst) {
      sources.remove(src);
    }
  }

  pub fn has_vertex(&self, v: &str) -> bool {
    self.vertices.contains(v)
  }

  pub fn has_edge(&self, src: &str, dst: &str) -> bool {
    self.down.get(src).is_some_and(|d| d.contains(dst))
  }

  /// Vertices in name order.
  pub fn vertices(&self) -> impl Iterator<Item = &str> {
    self.vertices.iter().map(String::as_str)
  }

  /// Edges as `(src, dst)` pairs, ordered by source then target.
  pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .down
      .iter()
      .flat_map(|(src, dsts)| dsts.iter().map(move |dst| (src.as_str(), dst.as_str())))
  }

  /// Direct dependencies of `v`, sorted.
  pub fn down_edges(&self, v: &str) -> Vec<&str> {
    self
      .down
      .get(v)
      .map(|d| d.iter().map(String::as_str).collect())
      .unwrap_or_default()
  }

  /// Direct dependents of `v`, sorted.
  pub fn up_edges(&self, v: &str) -> Vec<&str> {
    self
      .up
      .get(v)
      .map(|d| d.iter().map(String::as_str).collect())
      .unwrap_or_default()
  }

  /// Every vertex reachable through down edges from `v`, excluding `v`.
  pub fn descendants(&self, v: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let _ = self.depth_first_walk(&self.down_edges(v), |d, _| {
      out.insert(d.to_string());
      Ok::<_, ()>(())
    });
    out
  }

  /// Every vertex that transitively depends on `v`, excluding `v`.
  pub fn ancestors(&self, v: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut stack: Vec<&str> = self.up_edges(v);
    while let Some(current) = stack.pop() {
      if out.insert(current.to_string()) {
        stack.extend(self.up_edges(current));
      }
    }
    out
  }

  /// Strongly connected components with more than one vertex.
  pub fn cycles(&self) -> Vec<Vec<String>> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for v in self.vertices.iter().chain(self.down.keys()).chain(self.up.keys()) {
      index.entry(v.as_str()).or_insert_with(|| graph.add_node(v.as_str()));
    }
    for (src, dst) in self.edges() {
      graph.add_edge(index[src], index[dst], ());
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
      .into_iter()
      .filter(|scc| scc.len() > 1)
      .map(|scc| {
        let mut names: Vec<String> = scc.into_iter().map(|i| graph[i].to_string()).collect();
        names.sort();
        names
      })
      .collect();
    cycles.sort();
    cycles
  }

  /// Fails with every cycle and self-reference in the graph.
  pub fn validate(&self) -> Result<(), DagError> {
    let mut cycles = self.cycles();
    for (src, dst) in self.edges() {
      if src == dst {
        cycles.push(vec![src.to_string()]);
      }
    }
    if cycles.is_empty() {
      Ok(())
    } else {
      Err(DagError::CycleDetected { cycles })
    }
  }

  /// Fails if any edge names a vertex that was never added.
  pub fn check_edges(&self) -> Result<(), DagError> {
    for (src, dst) in self.edges() {
      if !self.has_vertex(src) || !self.has_vertex(dst) {
        return Err(DagError::DanglingEdge {
          src: src.to_string(),
          dst: dst.to_string(),
        });
      }
    }
    Ok(())
  }

  /// Depth-first walk over down edges from `start`.
  ///
  /// Each vertex is visited once, with its depth from the nearest start.
  /// Children are pushed in name order, so the walk is deterministic.
  pub fn depth_first_walk<E>(&self, start: &[&str], mut visit: impl FnMut(&str, usize) -> Result<(), E>) -> Result<(), E> {
    let mut seen = BTreeSet::new();
    let mut frontier: Vec<(&str, usize)> = start.iter().map(|v| (*v, 0)).collect();

    while let Some((current, depth)) = frontier.pop() {
      if !seen.insert(current) {
        continue;
      }
      visit(current, depth)?;
      frontier.extend(self.down_edges(current).into_iter().map(|t| (t, depth + 1)));
    }
    Ok(())
  }

  /// Remove every edge `(u, w)` for which a longer path `u -> v -> ... -> w`
  /// exists. Reachability is unchanged. Undefined on cyclic graphs.
  pub fn transitive_reduction(&mut self) {
    let sources: Vec<String> = self.down.keys().cloned().collect();
    for u in sources {
      let u_targets: BTreeSet<String> = self.down.get(&u).cloned().unwrap_or_default();
      let starts: Vec<&str> = u_targets.iter().map(String::as_str).collect();

      let mut redundant = BTreeSet::new();
      let _ = self.depth_first_walk(&starts, |v, _| {
        for shared in self.down_edges(v) {
          if u_targets.contains(shared) {
            redundant.insert(shared.to_string());
          }
        }
        Ok::<_, ()>(())
      });

      for v_prime in redundant {
        self.remove_edge(&u, &v_prime);
      }
    }
  }

  /// `start` and all of its descendants, leaves first.
  ///
  /// A vertex reached again by a later path is moved to the end of the
  /// path before reversal, so it lands before everything that needs it.
  pub fn topological_sort(&self, start: &str) -> Vec<String> {
    let mut path: Vec<&str> = vec![start];
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut frontier: Vec<&str> = vec![start];

    while let Some(current) = frontier.pop() {
      if !seen.insert(current)
        && let Some(idx) = path.iter().position(|v| *v == current)
      {
        path.remove(idx);
      }
      if current != start {
        path.push(current);
      }
      frontier.extend(self.down_edges(current));
    }

    path.into_iter().rev().map(str::to_string).collect()
  }

  /// Subgraph of `start` and its descendants, transitively reduced.
  pub fn isolate(&self, start: &str) -> Dag {
    self.isolate_many(&[start])
  }

  /// Union of the subgraphs rooted at each of `starts`, transitively reduced.
  pub fn isolate_many(&self, starts: &[&str]) -> Dag {
    let mut graph = Dag::new();
    let _ = self.depth_first_walk(starts, |v, _| {
      graph.add(v);
      for dst in self.down_edges(v) {
        graph.add(dst);
        graph.connect(v, dst);
      }
      Ok::<_, ()>(())
    });
    graph.transitive_reduction();
    graph
  }

  /// Vertices with no dependents.
  pub fn roots(&self) -> Vec<&str> {
    self.vertices().filter(|v| self.up_edges(v).is_empty()).collect()
  }

  pub fn len(&self) -> usize {
    self.vertices.len()
  }

  pub fn is_empty(&self) -> bool {
    self.vertices.is_empty()
  }
}
