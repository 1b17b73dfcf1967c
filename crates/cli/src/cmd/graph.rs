//! `ark graph`, `ark edges` and `ark connect`.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use ark_lib::dag::{Dag, DagError};
use ark_lib::execute::GraphSnapshot;
use ark_lib::storage::{GraphEdge, Store};

use crate::context::AppContext;
use crate::output::{OutputFormat, print_json, print_success, symbols};

pub async fn cmd_graph(ctx: &AppContext, keys: &[String], dot: bool, output: OutputFormat) -> Result<()> {
  let graph = ctx.store.get_graph().await.context("Failed to load the graph")?;
  graph.validate()?;
  let dag = isolate(graph, keys)?;

  if output.is_json() {
    return print_json(&GraphSnapshot::from(&dag));
  }
  if dot {
    print!("{}", to_dot(&dag));
    return Ok(());
  }
  for v in dag.vertices() {
    println!("{v}");
    for dep in dag.down_edges(v) {
      println!(
        "  {} {}",
        symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        dep
      );
    }
  }
  Ok(())
}

fn isolate(graph: Dag, keys: &[String]) -> Result<Dag, DagError> {
  if keys.is_empty() {
    return Ok(graph);
  }
  for key in keys {
    if !graph.has_vertex(key) {
      return Err(DagError::VertexNotFound(key.clone()));
    }
  }
  let roots: Vec<&str> = keys.iter().map(String::as_str).collect();
  Ok(graph.isolate_many(&roots))
}

fn to_dot(dag: &Dag) -> String {
  let mut out = String::from("digraph ark {\n");
  for v in dag.vertices() {
    out.push_str(&format!("  {v:?};\n"));
  }
  for (src, dst) in dag.edges() {
    out.push_str(&format!("  {src:?} -> {dst:?};\n"));
  }
  out.push_str("}\n");
  out
}

pub async fn cmd_edges(ctx: &AppContext, output: OutputFormat) -> Result<()> {
  let mut edges = ctx.store.get_graph_edges().await.context("Failed to load edges")?;
  edges.sort();
  if output.is_json() {
    return print_json(&edges);
  }
  for e in &edges {
    println!("{} {} {}", e.src, symbols::ARROW, e.dst);
  }
  Ok(())
}

pub async fn cmd_connect(ctx: &AppContext, src: &str, dst: &str) -> Result<()> {
  ctx
    .store
    .connect_targets(GraphEdge::new(src, dst))
    .await
    .with_context(|| format!("Failed to connect {src} to {dst}"))?;
  print_success(&format!("{src} {} {dst}", symbols::ARROW));
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dot_lists_vertices_then_edges() {
    let mut dag = Dag::new();
    dag.add("a:x");
    dag.add("b:y");
    dag.connect("a:x", "b:y");
    assert_eq!(
      to_dot(&dag),
      "digraph ark {\n  \"a:x\";\n  \"b:y\";\n  \"a:x\" -> \"b:y\";\n}\n"
    );
  }

  #[test]
  fn unknown_roots_are_rejected() {
    let mut dag = Dag::new();
    dag.add("a:x");
    assert!(matches!(isolate(dag, &["nope".into()]), Err(DagError::VertexNotFound(k)) if k == "nope"));
  }
}
