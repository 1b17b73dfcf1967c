//! `ark list` and `ark show`.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde_json::json;

use ark_lib::storage::Store;
use ark_lib::targets::derive;
use ark_lib::util::hash::short_hash;

use crate::context::AppContext;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

pub async fn cmd_list(ctx: &AppContext, output: OutputFormat) -> Result<()> {
  let mut targets = ctx.store.get_targets().await.context("Failed to load targets")?;
  targets.sort_by_key(|t| t.key());

  if output.is_json() {
    let items: Vec<_> = targets
      .iter()
      .map(|t| json!({ "key": t.key(), "type": t.kind, "file": t.file }))
      .collect();
    return print_json(&items);
  }

  if targets.is_empty() {
    print_info("No targets. Add some with 'ark add'.");
    return Ok(());
  }
  for t in &targets {
    println!(
      "{} {}",
      t.key(),
      format!("({})", t.kind).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
  Ok(())
}

pub async fn cmd_show(ctx: &AppContext, key: &str, output: OutputFormat) -> Result<()> {
  let target = ctx
    .store
    .get_target_by_key(key)
    .await
    .with_context(|| format!("Failed to load {key}"))?;
  let derivation = derive(&target, &ctx.cache())?;

  if output.is_json() {
    return print_json(&json!({ "target": target, "artifact": derivation.artifact }));
  }

  print_success(key);
  print_stat("Type", &target.kind);
  print_stat("File", &target.file);
  print_stat("Hash", short_hash(derivation.hash()));
  print_stat("Cacheable", &derivation.cacheable().to_string());
  print_stat("Cache dir", &derivation.artifact.cache_dir(&ctx.home).display().to_string());
  if !target.depends_on.is_empty() {
    println!();
    println!("Depends on:");
    for dep in &target.depends_on {
      println!("  {}", dep.key);
    }
  }
  if !target.source_files.is_empty() {
    println!();
    println!("Source files:");
    for file in &target.source_files {
      println!("  {file}");
    }
  }
  Ok(())
}
