//! Implementation of the `ark add` command.
//!
//! Reads target records from JSON files (one object or an array per file)
//! and upserts them into the workspace database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ark_lib::storage::Store;
use ark_lib::target::Target;
use ark_lib::targets::docker_image;
use ark_lib::util::hash::short_hash;
use ark_lib::workspace::Workspace;

use crate::context::AppContext;
use crate::output::{OutputFormat, print_json, print_success};

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetFile {
  One(Box<Target>),
  Many(Vec<Target>),
}

#[derive(Serialize)]
struct Added {
  key: String,
  hash: String,
}

pub async fn cmd_add(ctx: &AppContext, files: &[PathBuf], output: OutputFormat) -> Result<()> {
  let mut added = Vec::new();
  for file in files {
    for target in read_targets(file)? {
      let target = complete(target, &ctx.workspace, file);
      let key = target.key();
      let artifact = ctx
        .store
        .add_target(target)
        .await
        .with_context(|| format!("Failed to add {key}"))?;
      added.push(Added {
        key,
        hash: artifact.hash,
      });
    }
  }

  if output.is_json() {
    print_json(&added)?;
  } else {
    for a in &added {
      print_success(&format!("{} {}", a.key, short_hash(&a.hash)));
    }
  }
  Ok(())
}

fn read_targets(file: &Path) -> Result<Vec<Target>> {
  let content = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
  let parsed: TargetFile =
    serde_json::from_str(&content).with_context(|| format!("Failed to parse targets in {}", file.display()))?;
  Ok(match parsed {
    TargetFile::One(t) => vec![*t],
    TargetFile::Many(ts) => ts,
  })
}

/// Fill what a record may leave implicit: the realm is the workspace root,
/// the declaring file defaults to `file`, and relative paths are taken from
/// the root.
fn complete(mut target: Target, workspace: &Workspace, file: &Path) -> Target {
  let root = workspace.root();
  if target.realm.is_empty() {
    target.realm = root.to_string_lossy().into_owned();
  }
  if target.file.is_empty() {
    target.file = std::path::absolute(file)
      .unwrap_or_else(|_| file.to_path_buf())
      .to_string_lossy()
      .into_owned();
  } else if Path::new(&target.file).is_relative() {
    target.file = root.join(&target.file).to_string_lossy().into_owned();
  }
  if target.kind == docker_image::TYPE && workspace.settings.internal.disable_entrypoint_injection {
    target
      .attributes
      .entry("disableEntrypointInjection")
      .or_insert(Value::Bool(true));
  }
  target
}
