//! SQLite-backed store.
//!
//! Targets live in `targets` keyed by target key; list-valued and map-valued
//! fields are JSON text columns. Edges live in `graph_edges` keyed by
//! `<src>:<dst>`. Writes that touch more than one row run in a transaction.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{GraphEdge, StorageError, Store, ancestor_edges};
use crate::artifact::{Artifact, CacheConfig};
use crate::target::Target;
use crate::targets::derive;

/// Connection string for a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS targets (
  key TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  type TEXT NOT NULL,
  file TEXT NOT NULL,
  realm TEXT NOT NULL,
  attributes TEXT NOT NULL,
  source_files TEXT NOT NULL,
  labels TEXT NOT NULL,
  depends_on TEXT NOT NULL,
  exclude_from_hash TEXT NOT NULL,
  ignore_file_not_exists_error INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS graph_edges (
  key TEXT PRIMARY KEY,
  src TEXT NOT NULL,
  dst TEXT NOT NULL
);
";

const SELECT_TARGET: &str = "SELECT name, type, file, realm, attributes, source_files, labels, depends_on, \
                             exclude_from_hash, ignore_file_not_exists_error FROM targets";

const UPSERT_TARGET: &str = "
INSERT INTO targets (key, name, type, file, realm, attributes, source_files, labels, depends_on,
                     exclude_from_hash, ignore_file_not_exists_error)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(key) DO UPDATE SET
  name = excluded.name,
  type = excluded.type,
  file = excluded.file,
  realm = excluded.realm,
  attributes = excluded.attributes,
  source_files = excluded.source_files,
  labels = excluded.labels,
  depends_on = excluded.depends_on,
  exclude_from_hash = excluded.exclude_from_hash,
  ignore_file_not_exists_error = excluded.ignore_file_not_exists_error";

const INSERT_EDGE: &str = "INSERT INTO graph_edges (key, src, dst) VALUES (?1, ?2, ?3) ON CONFLICT(key) DO NOTHING";

fn db(err: rusqlite::Error) -> StorageError {
  StorageError::Database(err.to_string())
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
  let raw: String = row.get(idx)?;
  serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<Target> {
  Ok(Target {
    name: row.get(0)?,
    kind: row.get(1)?,
    file: row.get(2)?,
    realm: row.get(3)?,
    attributes: json_column(row, 4)?,
    source_files: json_column(row, 5)?,
    labels: json_column(row, 6)?,
    depends_on: json_column(row, 7)?,
    exclude_from_hash: json_column(row, 8)?,
    ignore_file_not_exists_error: row.get(9)?,
  })
}

fn to_json(key: &str, value: &impl serde::Serialize) -> Result<String, StorageError> {
  serde_json::to_string(value).map_err(|e| StorageError::Corrupt {
    key: key.to_string(),
    message: e.to_string(),
  })
}

fn lock(conn: &Mutex<Option<Connection>>) -> Result<std::sync::MutexGuard<'_, Option<Connection>>, StorageError> {
  conn
    .lock()
    .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn open_connection(connection: &str) -> Result<Connection, StorageError> {
  let conn = if connection == IN_MEMORY {
    Connection::open_in_memory().map_err(db)?
  } else {
    if let Some(parent) = Path::new(connection).parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(format!("{}: {e}", parent.display())))?;
    }
    Connection::open(connection).map_err(db)?
  };
  conn
    .busy_timeout(std::time::Duration::from_secs(5))
    .map_err(db)?;
  Ok(conn)
}

fn insert_edge(tx: &Transaction<'_>, edge: &GraphEdge) -> rusqlite::Result<usize> {
  tx.execute(INSERT_EDGE, params![edge.key(), edge.src, edge.dst])
}

/// Queries run on the blocking pool; the connection is shared with those
/// tasks and never locked on an async worker.
#[derive(Debug, Default)]
pub struct SqliteStore {
  cache: CacheConfig,
  conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
  pub fn new(cache: CacheConfig) -> Self {
    Self {
      cache,
      conn: Arc::default(),
    }
  }

  /// Opened and migrated store at `connection`.
  pub async fn connect(cache: CacheConfig, connection: &str) -> Result<Self, StorageError> {
    let store = Self::new(cache);
    store.open(connection).await?;
    store.migrate().await?;
    Ok(store)
  }

  async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
  where
    F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = lock(&conn)?;
      let conn = guard.as_mut().ok_or(StorageError::NotOpen)?;
      f(conn)
    })
    .await
    .map_err(|e| StorageError::Database(format!("database task failed: {e}")))?
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn open(&self, connection: &str) -> Result<(), StorageError> {
    let shared = Arc::clone(&self.conn);
    let owned = connection.to_string();
    tokio::task::spawn_blocking(move || {
      let conn = open_connection(&owned)?;
      *lock(&shared)? = Some(conn);
      Ok::<(), StorageError>(())
    })
    .await
    .map_err(|e| StorageError::Database(format!("database task failed: {e}")))??;
    info!(connection, "opened target database");
    Ok(())
  }

  async fn migrate(&self) -> Result<(), StorageError> {
    self.with_conn(|conn| conn.execute_batch(SCHEMA).map_err(db)).await
  }

  async fn get_targets(&self) -> Result<Vec<Target>, StorageError> {
    self.with_conn(|conn| {
      let mut stmt = conn.prepare(&format!("{SELECT_TARGET} ORDER BY key")).map_err(db)?;
      let rows = stmt.query_map([], target_from_row).map_err(db)?;
      rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    })
    .await
  }

  async fn get_target_by_key(&self, key: &str) -> Result<Target, StorageError> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        conn
          .query_row(&format!("{SELECT_TARGET} WHERE key = ?1"), params![key], target_from_row)
          .optional()
          .map_err(db)?
          .ok_or(StorageError::NotFound(key))
      })
      .await
  }

  async fn add_target(&self, target: Target) -> Result<Artifact, StorageError> {
    target.validate()?;
    let derivation = derive(&target, &self.cache)?;
    let key = target.key();
    let edges = ancestor_edges(&target);
    for edge in &edges {
      edge.validate()?;
    }

    let attributes = to_json(&key, &target.attributes)?;
    let source_files = to_json(&key, &target.source_files)?;
    let labels = to_json(&key, &target.labels)?;
    let depends_on = to_json(&key, &target.depends_on)?;
    let exclude_from_hash = to_json(&key, &target.exclude_from_hash)?;

    let stored = key.clone();
    let edge_count = edges.len();
    self
      .with_conn(move |conn| {
        let tx = conn.transaction().map_err(db)?;
        tx.execute(
          UPSERT_TARGET,
          params![
            stored,
            target.name,
            target.kind,
            target.file,
            target.realm,
            attributes,
            source_files,
            labels,
            depends_on,
            exclude_from_hash,
            target.ignore_file_not_exists_error,
          ],
        )
        .map_err(db)?;
        for edge in &edges {
          insert_edge(&tx, edge).map_err(db)?;
        }
        tx.commit().map_err(db)
      })
      .await?;
    debug!(target_key = %key, edges = edge_count, "stored target");
    Ok(derivation.artifact)
  }

  async fn connect_targets(&self, edge: GraphEdge) -> Result<(), StorageError> {
    edge.validate()?;
    self
      .with_conn(move |conn| {
        let tx = conn.transaction().map_err(db)?;
        insert_edge(&tx, &edge).map_err(db)?;
        tx.commit().map_err(db)
      })
      .await
  }

  async fn get_graph_edges(&self) -> Result<Vec<GraphEdge>, StorageError> {
    self.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT src, dst FROM graph_edges ORDER BY key")
        .map_err(db)?;
      let rows = stmt
        .query_map([], |row| {
          Ok(GraphEdge {
            src: row.get(0)?,
            dst: row.get(1)?,
          })
        })
        .map_err(db)?;
      rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    })
    .await
  }
}
