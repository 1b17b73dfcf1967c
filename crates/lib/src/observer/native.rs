//! In-process backend: a recursive walk followed by OS change notifications.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use super::file::{FileRecord, rel_name};
use super::{Filter, ObserverError};

/// Events arriving closer together than this are delivered as one batch.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Every file under `root` that `filter` keeps. Ignored directories are not
/// descended into.
pub fn walk(root: &Path, filter: &Filter) -> Result<Vec<FileRecord>, ObserverError> {
  let mut files = Vec::new();
  let mut entries = WalkDir::new(root).min_depth(1).follow_links(false).into_iter();

  while let Some(entry) = entries.next() {
    let entry = entry.map_err(|e| ObserverError::Walk(e.to_string()))?;
    let rel = rel_name(root, entry.path());
    let is_dir = entry.file_type().is_dir();
    if filter.ignored(&rel, is_dir) {
      trace!(file = %rel, "ignored");
      if is_dir {
        entries.skip_current_dir();
      }
      continue;
    }
    let meta = entry.metadata().map_err(|e| ObserverError::Walk(e.to_string()))?;
    files.push(FileRecord::from_metadata(root, entry.path(), &meta)?);
  }
  debug!(root = %root.display(), files = files.len(), "walked");
  Ok(files)
}

/// Initial walk, then batches of changes until `cancel` fires or the
/// receiver goes away.
pub(super) async fn produce(
  root: PathBuf,
  filter: Filter,
  tx: mpsc::Sender<Result<Vec<FileRecord>, ObserverError>>,
  cancel: CancellationToken,
) {
  let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
  let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
    let _ = raw_tx.send(res);
  });
  let mut watcher: RecommendedWatcher = match watcher {
    Ok(w) => w,
    Err(e) => {
      let _ = tx.send(Err(e.into())).await;
      return;
    }
  };
  if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
    let _ = tx.send(Err(e.into())).await;
    return;
  }

  let initial = {
    let (root, filter) = (root.clone(), filter.clone());
    tokio::task::spawn_blocking(move || walk(&root, &filter))
      .await
      .unwrap_or_else(|e| Err(ObserverError::Walk(e.to_string())))
  };
  if tx.send(initial).await.is_err() {
    return;
  }

  loop {
    let first = tokio::select! {
      _ = cancel.cancelled() => return,
      ev = raw_rx.recv() => match ev {
        Some(ev) => ev,
        None => return,
      },
    };
    let mut batch = vec![first];
    while let Ok(Some(ev)) = tokio::time::timeout(DEBOUNCE, raw_rx.recv()).await {
      batch.push(ev);
    }

    let (root, filter) = (root.clone(), filter.clone());
    let records = tokio::task::spawn_blocking(move || records_for(&root, &filter, batch))
      .await
      .unwrap_or_else(|e| vec![Err(ObserverError::Walk(e.to_string()))]);

    let mut files = Vec::new();
    for record in records {
      match record {
        Ok(r) => files.push(r),
        Err(e) => {
          if tx.send(Err(e)).await.is_err() {
            return;
          }
        }
      }
    }
    if !files.is_empty() && tx.send(Ok(files)).await.is_err() {
      return;
    }
  }
}

fn is_removal(kind: &EventKind) -> bool {
  matches!(
    kind,
    EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From))
  )
}

/// Turn raw notifications into file records, keeping the last state of
/// each path.
fn records_for(
  root: &Path,
  filter: &Filter,
  events: Vec<notify::Result<notify::Event>>,
) -> Vec<Result<FileRecord, ObserverError>> {
  let mut latest: Vec<(PathBuf, bool)> = Vec::new();
  let mut out = Vec::new();

  for event in events {
    let event = match event {
      Ok(event) => event,
      Err(e) => {
        out.push(Err(e.into()));
        continue;
      }
    };
    if matches!(event.kind, EventKind::Access(_)) {
      continue;
    }
    let removed = is_removal(&event.kind);
    for path in event.paths {
      latest.retain(|(p, _)| p != &path);
      latest.push((path, removed));
    }
  }

  for (path, removed) in latest {
    let rel = rel_name(root, &path);
    if removed || !path.exists() {
      if !filter.ignored(&rel, false) {
        out.push(Ok(FileRecord::deleted(root, &path)));
      }
      continue;
    }
    if filter.ignored(&rel, path.is_dir()) {
      continue;
    }
    match FileRecord::from_path(root, &path) {
      Ok(record) => out.push(Ok(record)),
      // raced with a deletion
      Err(ObserverError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
        out.push(Ok(FileRecord::deleted(root, &path)));
      }
      Err(e) => {
        warn!(file = %path.display(), error = %e, "failed to stat changed file");
        out.push(Err(e));
      }
    }
  }
  out
}
