//! Filesystem observation.
//!
//! An [`Observer`] turns batches of [`FileRecord`]s from a backend into
//! [`ChangeNotification`]s. Each batch is filtered (`.gitignore`, the
//! workspace ignore globs, `.gitignore` files themselves and editor swap
//! files), folded into the file index, and then offered to every registered
//! [`FileMatchCache`]. A cache whose aggregate hash moved is reported in
//! [`ChangeNotification::matched`].
//!
//! Backends:
//!
//! - [`Backend::Native`]: a walk of the root followed by OS notifications;
//! - [`Backend::Watchman`]: a subscription to an external watchman daemon.

pub mod cache;
pub mod file;
pub mod matcher;
pub mod native;
#[cfg(unix)]
pub mod watchman;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::util::hash::short_hash;

pub use cache::FileMatchCache;
pub use file::{FileRecord, FileType};
pub use matcher::Matcher;

const SWAP_SUFFIXES: [&str; 3] = ["~", ".swp", ".swx"];
const GITIGNORE: &str = ".gitignore";
const STREAM_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum ObserverError {
  #[error("failed to access {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to walk the workspace: {0}")]
  Walk(String),

  #[error("invalid pattern {pattern}: {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: globset::Error,
  },

  #[error("failed to load .gitignore: {0}")]
  Gitignore(#[from] ignore::Error),

  #[error(transparent)]
  Notify(#[from] notify::Error),

  #[error("watchman: {0}")]
  Watchman(String),

  #[error("the {0} backend is not available on this platform")]
  Unsupported(&'static str),

  #[error("the observer stream ended")]
  Closed,
}

impl ObserverError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| ObserverError::Io { path, source }
  }
}

/// Decides which relative paths an observer drops.
#[derive(Debug, Clone)]
pub struct Filter {
  gitignore: Gitignore,
  ignore: GlobSet,
}

impl Filter {
  /// Honour `<root>/.gitignore` when present, plus the `ignore` globs.
  pub fn new(root: &Path, ignore: &[String]) -> Result<Self, ObserverError> {
    let mut builder = GitignoreBuilder::new(root);
    let path = root.join(GITIGNORE);
    if path.is_file()
      && let Some(err) = builder.add(&path)
    {
      return Err(err.into());
    }
    let gitignore = builder.build()?;

    let mut globs = GlobSetBuilder::new();
    for pattern in ignore {
      let glob = Glob::new(pattern).map_err(|source| ObserverError::Pattern {
        pattern: pattern.clone(),
        source,
      })?;
      globs.add(glob);
    }
    let ignore = globs.build().map_err(|source| ObserverError::Pattern {
      pattern: ignore.join(", "),
      source,
    })?;
    Ok(Self { gitignore, ignore })
  }

  pub fn ignored(&self, rel: &str, is_dir: bool) -> bool {
    if rel.is_empty() {
      return false;
    }
    rel.ends_with(GITIGNORE)
      || SWAP_SUFFIXES.iter().any(|s| rel.ends_with(s))
      || self.ignore.is_match(rel)
      || self.gitignore.matched_path_or_any_parents(rel, is_dir).is_ignore()
  }
}

/// One processed batch.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotification {
  pub files: Vec<FileRecord>,
  /// Snapshots of the caches whose hash changed, by registration key.
  pub matched: BTreeMap<String, FileMatchCache>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
  #[default]
  Native,
  /// A running watchman daemon; see [`Observer::with_watchman_socket`].
  Watchman,
}

pub struct Observer {
  root: PathBuf,
  ignore: Vec<String>,
  filter: Filter,
  indexing: bool,
  index: DashMap<String, FileRecord>,
  /// Mutated only by the task processing batches.
  caches: Mutex<BTreeMap<String, FileMatchCache>>,
  initial_scan: watch::Sender<bool>,
  socket: Option<PathBuf>,
}

impl std::fmt::Debug for Observer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Observer")
      .field("root", &self.root)
      .field("indexing", &self.indexing)
      .field("indexed", &self.index.len())
      .finish_non_exhaustive()
  }
}

impl Observer {
  pub fn new(root: impl Into<PathBuf>, ignore: Vec<String>) -> Result<Self, ObserverError> {
    let root = root.into();
    let filter = Filter::new(&root, &ignore)?;
    let (initial_scan, _) = watch::channel(false);
    Ok(Self {
      root,
      ignore,
      filter,
      indexing: true,
      index: DashMap::new(),
      caches: Mutex::new(BTreeMap::new()),
      initial_scan,
      socket: None,
    })
  }

  /// Only filter batches: no index and no match caches.
  pub fn without_indexing(mut self) -> Self {
    self.indexing = false;
    self
  }

  /// Use `socket` for the watchman backend instead of discovering it.
  pub fn with_watchman_socket(mut self, socket: impl Into<PathBuf>) -> Self {
    self.socket = Some(socket.into());
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Register `matcher` under `key`, replacing any earlier registration.
  pub async fn add_file_matcher(&self, key: impl Into<String>, mut matcher: Matcher) -> Result<(), ObserverError> {
    matcher.compile()?;
    self.caches.lock().await.insert(key.into(), FileMatchCache::new(matcher));
    Ok(())
  }

  pub async fn match_cache(&self, key: &str) -> Option<FileMatchCache> {
    self.caches.lock().await.get(key).cloned()
  }

  /// The indexed record for an absolute path.
  pub fn indexed(&self, name: &str) -> Option<FileRecord> {
    self.index.get(name).map(|r| r.clone())
  }

  /// Filter, index and match one batch.
  pub async fn process(&self, files: Vec<FileRecord>) -> ChangeNotification {
    let files: Vec<FileRecord> = files
      .into_iter()
      .filter(|f| {
        let keep = !self.filter.ignored(&f.rel_name, f.is_dir());
        if !keep {
          trace!(file = %f.rel_name, "filtered");
        }
        keep
      })
      .collect();

    let mut notification = ChangeNotification {
      files,
      matched: BTreeMap::new(),
    };
    if self.indexing {
      for file in &mut notification.files {
        if file.exists {
          self.index.insert(file.name.clone(), file.clone());
        } else if let Some((_, known)) = self.index.remove(&file.name) {
          file.kind = known.kind;
        }
      }

      let mut caches = self.caches.lock().await;
      for (key, cache) in caches.iter_mut() {
        cache.update(&notification.files);
        cache.compute_hash();
        if cache.changed() {
          debug!(key = %key, files = cache.len(), hash = %short_hash(&cache.hash), "match cache changed");
          notification.matched.insert(key.clone(), cache.clone());
        }
      }
    }

    self.initial_scan.send_replace(true);
    notification
  }

  /// Resolves once the first batch has been processed.
  pub async fn wait_for_initial_scan(&self) {
    let mut rx = self.initial_scan.subscribe();
    let _ = rx.wait_for(|done| *done).await;
  }

  /// Walk the root once and process the result.
  pub async fn reindex(&self) -> Result<ChangeNotification, ObserverError> {
    let (root, filter) = (self.root.clone(), self.filter.clone());
    let files = tokio::task::spawn_blocking(move || native::walk(&root, &filter))
      .await
      .map_err(|e| ObserverError::Walk(e.to_string()))??;
    Ok(self.process(files).await)
  }

  /// Observe continuously. The first notification holds the initial scan
  /// (native backend) or the daemon's initial listing (watchman).
  pub fn watch(
    self: &Arc<Self>,
    backend: Backend,
    cancel: CancellationToken,
  ) -> mpsc::Receiver<Result<ChangeNotification, ObserverError>> {
    let (raw_tx, mut raw_rx) = mpsc::channel(STREAM_BUFFER);
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    match backend {
      Backend::Native => {
        tokio::spawn(native::produce(self.root.clone(), self.filter.clone(), raw_tx, cancel.clone()));
      }
      #[cfg(unix)]
      Backend::Watchman => {
        let (root, ignore, socket) = (self.root.clone(), self.ignore.clone(), self.socket.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move {
          let socket = match socket {
            Some(s) => s,
            None => match watchman::socket_path().await {
              Ok(s) => s,
              Err(e) => {
                let _ = raw_tx.send(Err(e)).await;
                return;
              }
            },
          };
          watchman::produce(socket, root, ignore, raw_tx, cancel).await;
        });
      }
      #[cfg(not(unix))]
      Backend::Watchman => {
        let _ = raw_tx.try_send(Err(ObserverError::Unsupported("watchman")));
      }
    }

    let observer = self.clone();
    tokio::spawn(async move {
      loop {
        let batch = tokio::select! {
          _ = cancel.cancelled() => return,
          batch = raw_rx.recv() => batch,
        };
        let Some(batch) = batch else {
          return;
        };
        let item = match batch {
          Ok(files) => Ok(observer.process(files).await),
          Err(e) => Err(e),
        };
        if tx.send(item).await.is_err() {
          return;
        }
      }
    });
    rx
  }
}
