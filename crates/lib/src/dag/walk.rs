//! Parallel leaves-first traversal.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::Dag;

/// Outcome of a [`walk`].
#[derive(Debug)]
pub struct WalkResult<E> {
  /// Vertices whose visit succeeded, in completion order.
  pub succeeded: Vec<String>,
  pub failed: BTreeMap<String, E>,
  /// Vertices never visited because a dependency failed, mapped to the
  /// dependency that failed first.
  pub skipped: BTreeMap<String, String>,
  /// Vertices whose visit task panicked.
  pub panicked: BTreeMap<String, String>,
  /// Vertices not visited because the walk was cancelled.
  pub cancelled: Vec<String>,
}

impl<E> Default for WalkResult<E> {
  fn default() -> Self {
    Self {
      succeeded: Vec::new(),
      failed: BTreeMap::new(),
      skipped: BTreeMap::new(),
      panicked: BTreeMap::new(),
      cancelled: Vec::new(),
    }
  }
}

impl<E> WalkResult<E> {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.panicked.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
  }
}

/// Visit every vertex of `dag` after all of its dependencies succeeded.
///
/// Up to `max_concurrency` visits run at once; each acquires its permit
/// inside its own task. A failed vertex does not stop independent
/// siblings, but everything depending on it is skipped. Once `cancel`
/// fires no new visit starts; in-flight visits are drained.
pub async fn walk<E, F, Fut>(dag: &Dag, max_concurrency: usize, cancel: CancellationToken, visit: F) -> WalkResult<E>
where
  F: Fn(String) -> Fut,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
  E: Send + 'static,
{
  let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
  let mut pending: HashMap<&str, usize> = dag.vertices().map(|v| (v, dag.down_edges(v).len())).collect();
  let mut ready: Vec<String> = dag
    .vertices()
    .filter(|v| pending.get(v) == Some(&0))
    .map(str::to_string)
    .collect();

  let mut join_set: JoinSet<(String, Option<Result<(), E>>)> = JoinSet::new();
  let mut task_keys = HashMap::new();
  let mut result = WalkResult::default();

  loop {
    if !cancel.is_cancelled() {
      for v in ready.drain(..) {
        debug!(target_key = %v, "scheduling");
        let fut = visit(v.clone());
        let semaphore = semaphore.clone();
        let token = cancel.clone();
        let key = v.clone();
        let handle = join_set.spawn(async move {
          tokio::select! {
            _ = token.cancelled() => (key, None),
            _permit = semaphore.acquire_owned() => {
              let outcome = fut.await;
              (key, Some(outcome))
            }
          }
        });
        task_keys.insert(handle.id(), v);
      }
    }

    let Some(joined) = join_set.join_next_with_id().await else {
      break;
    };

    match joined {
      Ok((id, (v, outcome))) => {
        task_keys.remove(&id);
        match outcome {
          Some(Ok(())) => {
            for up in dag.up_edges(&v) {
              if let Some(count) = pending.get_mut(up) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                  ready.push(up.to_string());
                }
              }
            }
            result.succeeded.push(v);
          }
          Some(Err(e)) => {
            result.failed.insert(v, e);
          }
          None => result.cancelled.push(v),
        }
      }
      Err(e) => {
        let v = task_keys.remove(&e.id()).unwrap_or_default();
        error!(target_key = %v, error = %e, "visit task panicked");
        result.panicked.insert(v, e.to_string());
      }
    }
  }

  classify_unvisited(dag, &mut result);
  result
}

fn classify_unvisited<E>(dag: &Dag, result: &mut WalkResult<E>) {
  let visited = |r: &WalkResult<E>, v: &str| {
    r.succeeded.iter().any(|s| s == v)
      || r.failed.contains_key(v)
      || r.panicked.contains_key(v)
      || r.skipped.contains_key(v)
      || r.cancelled.iter().any(|c| c == v)
  };

  loop {
    let mut changed = false;
    for v in dag.vertices() {
      if visited(result, v) {
        continue;
      }
      let cause = dag.down_edges(v).into_iter().find_map(|dep| {
        if result.failed.contains_key(dep) || result.panicked.contains_key(dep) {
          Some(dep.to_string())
        } else {
          result.skipped.get(dep).cloned()
        }
      });
      if let Some(cause) = cause {
        debug!(target_key = %v, failed_dependency = %cause, "skipping");
        result.skipped.insert(v.to_string(), cause);
        changed = true;
      }
    }
    if !changed {
      break;
    }
  }

  let leftover: Vec<String> = dag
    .vertices()
    .filter(|v| !visited(result, v))
    .map(str::to_string)
    .collect();
  result.cancelled.extend(leftover);
}
