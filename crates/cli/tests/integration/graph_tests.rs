//! graph, edges and connect.

use predicates::prelude::*;
use serde_json::json;

use super::common::TestEnv;

fn chain(env: &TestEnv) {
  env.add(
    "targets.json",
    json!([
      env.local_file("base", "base.txt", "base", &[]),
      env.local_file("app", "app.txt", "app", &["BUILD.hcl:base"]),
      env.local_file("other", "other.txt", "other", &[]),
    ]),
  );
}

#[test]
fn declared_dependencies_become_edges() {
  let env = TestEnv::new();
  chain(&env);

  let edges = env.stdout_json(&["edges"]);
  assert_eq!(edges, json!([{"src": "BUILD.hcl:app", "dst": "BUILD.hcl:base"}]));

  env
    .ark_cmd()
    .arg("graph")
    .assert()
    .success()
    .stdout(predicate::str::contains("BUILD.hcl:app\n  → BUILD.hcl:base"));
}

#[test]
fn graph_can_be_isolated() {
  let env = TestEnv::new();
  chain(&env);

  let graph = env.stdout_json(&["graph", "BUILD.hcl:app"]);
  assert_eq!(graph["vertices"], json!(["BUILD.hcl:app", "BUILD.hcl:base"]));
  assert_eq!(graph["edges"], json!([["BUILD.hcl:app", "BUILD.hcl:base"]]));

  env
    .ark_cmd()
    .args(["graph", "BUILD.hcl:missing"])
    .assert()
    .failure();
}

#[test]
fn dot_output() {
  let env = TestEnv::new();
  chain(&env);
  env
    .ark_cmd()
    .args(["graph", "--dot"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with("digraph ark {"))
    .stdout(predicate::str::contains("\"BUILD.hcl:app\" -> \"BUILD.hcl:base\";"));
}

#[test]
fn connect_adds_an_edge() {
  let env = TestEnv::new();
  chain(&env);
  env
    .ark_cmd()
    .args(["connect", "BUILD.hcl:other", "BUILD.hcl:base"])
    .assert()
    .success();

  let edges = env.stdout_json(&["edges"]);
  assert_eq!(edges.as_array().unwrap().len(), 2);
  assert_eq!(edges[1], json!({"src": "BUILD.hcl:other", "dst": "BUILD.hcl:base"}));
}

#[test]
fn cycles_are_reported() {
  let env = TestEnv::new();
  chain(&env);
  env
    .ark_cmd()
    .args(["connect", "BUILD.hcl:base", "BUILD.hcl:app"])
    .assert()
    .success();
  env
    .ark_cmd()
    .arg("graph")
    .assert()
    .failure()
    .stderr(predicate::str::contains("cycle"));
}
