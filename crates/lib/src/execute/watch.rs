//! Watch mode: rerun targets whose source files change.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{EventSink, ExecuteError, Executor, RunOptions};
use crate::dag::Dag;
use crate::observer::{Backend, Matcher, Observer, ObserverError};

/// Run once, then rerun the graph rooted at every target whose source files
/// changed, until `cancel` fires.
///
/// Each target is registered with `observer` under its key, matching its
/// normalized source files. Failed reruns are logged and watching goes on.
pub async fn watch(
  executor: &Executor,
  observer: Arc<Observer>,
  backend: Backend,
  options: RunOptions,
  cancel: CancellationToken,
  events: &EventSink,
) -> Result<(), ExecuteError> {
  let (dag, targets) = executor.plan(&options).await?;
  for (key, target) in &targets {
    let files = target.normalized()?.source_files;
    if files.is_empty() {
      continue;
    }
    observer.add_file_matcher(key.clone(), Matcher::for_paths(files)?).await?;
  }

  let mut stream = observer.watch(backend, cancel.child_token());
  tokio::select! {
    _ = cancel.cancelled() => return Ok(()),
    first = stream.recv() => match first {
      Some(Ok(_)) => {}
      Some(Err(e)) => return Err(e.into()),
      None => return Err(ObserverError::Closed.into()),
    },
  }

  let summary = executor.execute(Uuid::new_v4(), &options, cancel.clone(), events).await?;
  info!(succeeded = summary.succeeded.len(), failed = summary.failed.len(), "initial run finished, watching for changes");

  loop {
    let notification = tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      next = stream.recv() => match next {
        Some(Ok(n)) => n,
        Some(Err(e)) => {
          warn!(error = %e, "observer error");
          continue;
        }
        None => return Err(ObserverError::Closed.into()),
      },
    };

    let changed: BTreeSet<String> = notification
      .matched
      .into_keys()
      .filter(|key| dag.has_vertex(key))
      .collect();
    if changed.is_empty() {
      continue;
    }
    info!(targets = ?changed, "source files changed");

    let rerun = RunOptions {
      target_keys: rerun_roots(&dag, &changed),
      ..options.clone()
    };
    match executor.execute(Uuid::new_v4(), &rerun, cancel.clone(), events).await {
      Ok(summary) if !summary.is_success() => {
        warn!(failed = summary.failed.len(), skipped = summary.skipped.len(), "rerun finished with failures");
      }
      Ok(_) => {}
      Err(e) => error!(error = %e, "rerun failed"),
    }
  }
}

/// The changed targets plus every planned target that depends on one of
/// them, so dependents pick up the new fingerprints.
fn rerun_roots(dag: &Dag, changed: &BTreeSet<String>) -> Vec<String> {
  let mut roots = changed.clone();
  for key in changed {
    roots.extend(dag.ancestors(key));
  }
  roots.into_iter().collect()
}
