//! Implementation of the `ark run` command.
//!
//! Runs the graph (or the part rooted at the given keys) against the local
//! docker, kubectl and nix-env binaries, streaming run events to the
//! terminal. With `--watch` the run repeats for targets whose source files
//! change, until interrupted.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ark_lib::clients::Clients;
use ark_lib::execute::{EventSink, Executor, Outcome, RunEvent, RunOptions, RunSummary, default_concurrency, watch};
use ark_lib::observer::{Backend, Observer};
use ark_lib::util::hash::short_hash;

use crate::context::AppContext;
use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_json_line, print_skip, print_stat, print_success,
  print_warning,
};

pub struct RunArgs {
  pub keys: Vec<String>,
  pub force: bool,
  pub pull: bool,
  pub push: bool,
  pub namespace: Option<String>,
  pub kube_context: Option<String>,
  pub jobs: Option<usize>,
  pub watch: bool,
  pub watchman: bool,
}

impl RunArgs {
  fn options(&self, ctx: &AppContext) -> RunOptions {
    RunOptions {
      target_keys: self.keys.clone(),
      force: self.force,
      pull: self.pull,
      push: self.push,
      max_concurrency: self.jobs.unwrap_or_else(default_concurrency).max(1),
      namespace: ctx.workspace.namespace(self.namespace.as_deref()),
      kube_context: self.kube_context.clone(),
    }
  }
}

pub async fn cmd_run(ctx: &AppContext, args: RunArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  if let Some(context) = &args.kube_context {
    ctx.workspace.check_context(context)?;
  }
  let options = args.options(ctx);

  let clients = Clients::local(options.kube_context.clone(), ctx.workspace.kv_storage(&ctx.home));
  let executor = Arc::new(
    Executor::new(ctx.store.clone(), ctx.cache(), clients).with_control_plane(ctx.workspace.control_plane_env()),
  );

  let cancel = CancellationToken::new();
  {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling");
        cancel.cancel();
      }
    });
  }

  if args.watch {
    let observer = Observer::new(ctx.workspace.root(), ctx.workspace.settings.file_system.ignore.clone())
      .context("Failed to start the file observer")?;
    let backend = if args.watchman { Backend::Watchman } else { Backend::Native };

    let (sink, mut events) = EventSink::channel();
    let printer = tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        if let Err(e) = render(&event, output) {
          print_error(&format!("{e:#}"));
        }
      }
    });
    let result = watch(&executor, Arc::new(observer), backend, options, cancel, &sink).await;
    drop(sink);
    printer.await.context("Event printer failed")?;
    return result.context("Watch failed");
  }

  let mut handle = executor.run(options, cancel);
  while let Some(event) = handle.events.recv().await {
    render(&event, output)?;
  }
  let summary = handle.wait().await.context("Run failed")?;
  if !output.is_json() {
    print_stat("Duration", &format_duration(start.elapsed()));
  }
  summary.check()?;
  Ok(())
}

fn render(event: &RunEvent, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    return print_json_line(event);
  }
  match event {
    RunEvent::Started { graph, .. } => print_info(&format!("Running {} target(s)", graph.vertices.len())),
    RunEvent::DerivationComputed(_) => {}
    RunEvent::ActionCached(v) => print_skip(&format!("{} cached", v.key)),
    RunEvent::ArtifactPulled(v) => print_info(&format!("{} pulled from the remote cache", v.key)),
    RunEvent::ActionStarted(v) => print_info(&format!("{} building {}", v.key, short_hash(&v.hash))),
    RunEvent::ArtifactPushStarted(v) => print_info(&format!("{} pushing to the remote cache", v.key)),
    RunEvent::ActionSuccess(v) => print_success(&format!("{} {}", v.key, short_hash(&v.hash))),
    RunEvent::Failed { vertex, error } => print_error(&format!("{}: {}", vertex.key, error)),
    RunEvent::Skipped { key, failed_dependency } => {
      print_warning(&format!("{key} skipped: {failed_dependency} failed"))
    }
    RunEvent::Finished { summary } => print_summary(summary),
  }
  Ok(())
}

fn print_summary(summary: &RunSummary) {
  println!();
  if summary.is_success() {
    print_success("Run complete!");
  } else {
    print_error("Run finished with failures");
  }
  print_stat("Built", &summary.count(Outcome::Built).to_string());
  print_stat("Cached", &summary.count(Outcome::Cached).to_string());
  print_stat("Pulled", &summary.count(Outcome::Pulled).to_string());
  if !summary.failed.is_empty() {
    print_stat("Failed", &summary.failed.len().to_string());
  }
  if !summary.skipped.is_empty() {
    print_stat("Skipped", &summary.skipped.len().to_string());
  }
  if !summary.cancelled.is_empty() {
    print_stat("Cancelled", &summary.cancelled.len().to_string());
  }
}
