use anyhow::{Context, Result};
use serde_json::json;

use ark_lib::storage::Store;
use ark_lib::targets::derive;
use ark_lib::util::hash::short_hash;

use crate::context::AppContext;
use crate::output::{OutputFormat, print_json};

/// Print the fingerprint `key` derives to, with its declared ancestor hashes.
pub async fn cmd_hash(ctx: &AppContext, key: &str, short: bool, output: OutputFormat) -> Result<()> {
  let target = ctx
    .store
    .get_target_by_key(key)
    .await
    .with_context(|| format!("Failed to load {key}"))?;
  let derivation = derive(&target, &ctx.cache()).with_context(|| format!("Failed to hash {key}"))?;
  let hash = derivation.hash();

  if output.is_json() {
    print_json(&json!({ "key": key, "hash": hash, "shortHash": short_hash(hash) }))
  } else {
    println!("{}", if short { short_hash(hash) } else { hash });
    Ok(())
  }
}
