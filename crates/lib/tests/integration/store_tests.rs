//! The SQLite store behind a run.

use std::sync::Arc;

use ark_lib::artifact::CacheConfig;
use ark_lib::execute::{Executor, Outcome, RunOptions};
use ark_lib::storage::{SqliteStore, Store};
use tempfile::TempDir;

use super::common::{clients, deploy, image, run};

#[tokio::test]
async fn a_reopened_database_runs_the_same_graph() {
  let home = TempDir::new().unwrap();
  let ws = TempDir::new().unwrap();
  std::fs::write(ws.path().join("Dockerfile.src"), "data").unwrap();
  let db = ws.path().join(".ark/ark.db");
  let db = db.to_string_lossy();
  let cache = CacheConfig::new(home.path(), "");

  {
    let store = SqliteStore::connect(cache.clone(), &db).await.unwrap();
    let src = ws.path().join("Dockerfile.src").to_string_lossy().into_owned();
    store.add_target(image(ws.path(), "api", &[&src])).await.unwrap();
    store.add_target(deploy(ws.path(), "svc", &["BUILD.hcl:api"])).await.unwrap();
  }

  let store = Arc::new(SqliteStore::connect(cache.clone(), &db).await.unwrap());
  let first = store.get_graph().await.unwrap();
  let second = store.get_graph().await.unwrap();
  assert_eq!(first.vertices().collect::<Vec<_>>(), second.vertices().collect::<Vec<_>>());
  assert_eq!(first.edges().collect::<Vec<_>>(), vec![("BUILD.hcl:svc", "BUILD.hcl:api")]);

  let (clients, _) = clients();
  let executor = Executor::new(store, cache, clients);
  let (summary, _) = run(
    &executor,
    RunOptions {
      namespace: "apps".into(),
      ..Default::default()
    },
  )
  .await;
  assert_eq!(summary.succeeded["BUILD.hcl:api"], Outcome::Built);
  assert_eq!(summary.succeeded["BUILD.hcl:svc"], Outcome::Built);
}
