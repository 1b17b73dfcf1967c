//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Isolated workspace with its own home directory.
///
/// The workspace root holds `.ark/settings.json`; the artifact cache lives
/// under `home`.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self::with_settings("{}")
  }

  pub fn with_settings(settings: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let env = Self { temp };
    env.write_file(".ark/settings.json", settings);
    std::fs::create_dir_all(env.home()).unwrap();
    env
  }

  pub fn root(&self) -> PathBuf {
    self.temp.path().to_path_buf()
  }

  pub fn home(&self) -> PathBuf {
    self.temp.path().join("home")
  }

  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// `ark` running in the workspace root with the cache under `home`.
  pub fn ark_cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("ark");
    cmd
      .current_dir(self.temp.path())
      .env("ARK_HOME", self.home())
      .env("NO_COLOR", "1")
      .env_remove("RUST_LOG")
      .env_remove("ARK_K8S_SAFE_CONTEXTS");
    cmd
  }

  /// Write `targets` to `name` and add them.
  pub fn add(&self, name: &str, targets: Value) {
    let file = self.write_file(name, &serde_json::to_string_pretty(&targets).unwrap());
    self.ark_cmd().arg("add").arg(&file).assert().success();
  }

  /// A `local_file` target declared in `BUILD.hcl` at the root.
  pub fn local_file(&self, name: &str, filename: &str, content: &str, depends_on: &[&str]) -> Value {
    json!({
      "name": name,
      "type": "local_file",
      "file": "BUILD.hcl",
      "attributes": {"filename": filename, "content": content},
      "dependsOn": depends_on.iter().map(|k| json!({"key": k, "hash": ""})).collect::<Vec<_>>(),
    })
  }

  pub fn stdout_json(&self, args: &[&str]) -> Value {
    let out = self.ark_cmd().args(["--output", "json"]).args(args).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
  }
}

pub fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap()
}
