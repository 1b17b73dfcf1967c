//! `ark run` against local_file targets, which need no external tools.

use predicates::prelude::*;
use serde_json::{Value, json};

use super::common::{TestEnv, read};

#[test]
fn run_writes_files_every_time() {
  let env = TestEnv::new();
  let out = env.root().join("out/hello.txt");
  env.add(
    "t.json",
    env.local_file("hello", out.to_str().unwrap(), "hello world", &[]),
  );

  env
    .ark_cmd()
    .arg("run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Run complete!"))
    .stdout(predicate::str::contains("Built: 1"));
  assert_eq!(read(&out), "hello world");

  // local files are not cacheable, so a second run rewrites the file
  std::fs::write(&out, "tampered").unwrap();
  env
    .ark_cmd()
    .arg("run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 1"))
    .stdout(predicate::str::contains("Cached: 0"));
  assert_eq!(read(&out), "hello world");
}

#[test]
fn run_only_the_requested_subgraph() {
  let env = TestEnv::new();
  env.add(
    "t.json",
    json!([
      env.local_file("base", "base.txt", "base", &[]),
      env.local_file("app", "app.txt", "app", &["BUILD.hcl:base"]),
      env.local_file("other", "other.txt", "other", &[]),
    ]),
  );

  let out = env
    .ark_cmd()
    .args(["--output", "json", "run", "BUILD.hcl:app"])
    .output()
    .unwrap();
  assert!(out.status.success());
  let events: Vec<Value> = String::from_utf8(out.stdout)
    .unwrap()
    .lines()
    .map(|l| serde_json::from_str(l).unwrap())
    .collect();

  assert_eq!(events[0]["event"], "started");
  assert_eq!(
    events[0]["graph"]["vertices"],
    json!(["BUILD.hcl:app", "BUILD.hcl:base"])
  );
  let finished = events.last().unwrap();
  assert_eq!(finished["event"], "finished");
  assert_eq!(
    finished["summary"]["succeeded"],
    json!({"BUILD.hcl:app": "built", "BUILD.hcl:base": "built"})
  );
}

#[test]
fn unknown_target_fails() {
  let env = TestEnv::new();
  env.add("t.json", env.local_file("a", "a.txt", "a", &[]));
  env
    .ark_cmd()
    .args(["run", "BUILD.hcl:nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("BUILD.hcl:nope"));
}

#[test]
fn deploy_without_namespace_fails_validation() {
  let env = TestEnv::new();
  env.add(
    "t.json",
    json!({
      "name": "svc",
      "type": "deploy",
      "file": "BUILD.hcl",
      "attributes": {"manifest": "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: svc\n"},
    }),
  );
  env
    .ark_cmd()
    .arg("run")
    .assert()
    .failure()
    .stderr(predicate::str::contains("namespace"));
}

#[test]
fn unsafe_kube_context_is_refused() {
  let env = TestEnv::new();
  env.add("t.json", env.local_file("a", "a.txt", "a", &[]));
  env
    .ark_cmd()
    .args(["run", "--kube-context", "production"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unsafe"));
}

#[test]
fn settings_namespace_and_safe_contexts_apply() {
  let env = TestEnv::with_settings(r#"{"kubernetes": {"safe_contexts": ["staging"], "namespace": "apps"}}"#);
  env.add("t.json", env.local_file("a", "a.txt", "a", &[]));
  env
    .ark_cmd()
    .args(["run", "--kube-context", "staging"])
    .assert()
    .success();
}
