//! What every command needs: the workspace, the home directory and the
//! target database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use ark_lib::artifact::CacheConfig;
use ark_lib::platform::paths;
use ark_lib::storage::SqliteStore;
use ark_lib::workspace::Workspace;

/// Target database, relative to the workspace `.ark` directory.
const DB_FILE: &str = "ark.db";

pub struct AppContext {
  pub workspace: Workspace,
  pub home: PathBuf,
  pub store: Arc<SqliteStore>,
}

impl AppContext {
  /// Load the workspace enclosing `dir` (default: the current directory)
  /// and open its database.
  pub async fn open(dir: Option<&Path>) -> Result<Self> {
    let start = match dir {
      Some(dir) => dir.to_path_buf(),
      None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let workspace = Workspace::load(&start).context("Failed to load workspace")?;
    let home = paths::home_dir()?;
    let db = workspace.dir().join(DB_FILE);
    let store = SqliteStore::connect(workspace.cache_config(&home), &db.to_string_lossy())
      .await
      .with_context(|| format!("Failed to open target database {}", db.display()))?;

    Ok(Self {
      workspace,
      home,
      store: Arc::new(store),
    })
  }

  pub fn cache(&self) -> CacheConfig {
    self.workspace.cache_config(&self.home)
  }
}
