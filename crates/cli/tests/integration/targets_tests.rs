//! add, list, show and hash.

use predicates::prelude::*;
use serde_json::json;

use super::common::TestEnv;

#[test]
fn added_targets_are_listed() {
  let env = TestEnv::new();
  env.add(
    "targets.json",
    json!([
      env.local_file("b", "b.txt", "b", &[]),
      env.local_file("a", "a.txt", "a", &[]),
    ]),
  );

  env
    .ark_cmd()
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("BUILD.hcl:a (local_file)"))
    .stdout(predicate::str::contains("BUILD.hcl:b (local_file)"));

  let listed = env.stdout_json(&["list"]);
  assert_eq!(listed[0]["key"], "BUILD.hcl:a");
  assert_eq!(listed[1]["key"], "BUILD.hcl:b");
}

#[test]
fn empty_workspace_lists_nothing() {
  TestEnv::new()
    .ark_cmd()
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("No targets"));
}

#[test]
fn invalid_targets_are_rejected() {
  let env = TestEnv::new();
  let file = env.write_file("bad.json", r#"{"name": "", "type": "local_file", "file": "BUILD.hcl"}"#);
  env.ark_cmd().arg("add").arg(&file).assert().failure();
}

#[test]
fn show_includes_the_derived_artifact() {
  let env = TestEnv::new();
  env.add("t.json", env.local_file("a", "a.txt", "hello", &[]));

  let shown = env.stdout_json(&["show", "BUILD.hcl:a"]);
  assert_eq!(shown["target"]["name"], "a");
  assert_eq!(shown["artifact"]["key"], "BUILD.hcl:a");
  assert_eq!(shown["artifact"]["type"], "local_file");
  assert!(
    shown["artifact"]["attributes"]["renderedFilePath"]
      .as_str()
      .unwrap()
      .ends_with("a.txt")
  );
}

#[test]
fn hash_is_stable_and_content_sensitive() {
  let env = TestEnv::new();
  env.add("t.json", env.local_file("a", "a.txt", "one", &[]));

  let first = env.stdout_json(&["hash", "BUILD.hcl:a"]);
  let again = env.stdout_json(&["hash", "BUILD.hcl:a"]);
  assert_eq!(first, again);
  assert_eq!(first["hash"].as_str().unwrap().len(), 64);
  assert_eq!(first["shortHash"].as_str().unwrap().len(), 7);

  env.add("t.json", env.local_file("a", "a.txt", "two", &[]));
  let changed = env.stdout_json(&["hash", "BUILD.hcl:a"]);
  assert_ne!(first["hash"], changed["hash"]);
}

#[test]
fn missing_target_fails() {
  TestEnv::new()
    .ark_cmd()
    .args(["show", "BUILD.hcl:nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}
