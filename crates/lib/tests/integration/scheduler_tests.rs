//! The scheduler end to end: an image and the deploy that uses it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ark_lib::artifact::CacheConfig;
use ark_lib::execute::{Executor, Outcome, RunEvent, RunOptions};
use ark_lib::storage::{MemoryStore, Store};
use tempfile::TempDir;

use super::common::{Recorders, clients, deploy, image, run, success_hash};

const API: &str = "BUILD.hcl:api";
const SVC: &str = "BUILD.hcl:svc";

struct Fixture {
  _home: TempDir,
  ws: TempDir,
  executor: Executor,
  rec: Recorders,
}

impl Fixture {
  async fn new() -> Self {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    std::fs::create_dir_all(ws.path().join("api")).unwrap();
    std::fs::write(ws.path().join("api/main.go"), "package main").unwrap();

    let cache = CacheConfig::new(home.path(), "");
    let store = Arc::new(MemoryStore::new(cache.clone()));
    store.add_target(image(ws.path(), "api", &[&src(ws.path())])).await.unwrap();
    store.add_target(deploy(ws.path(), "svc", &[API])).await.unwrap();

    let (clients, rec) = clients();
    Self {
      executor: Executor::new(store, cache, clients),
      _home: home,
      ws,
      rec,
    }
  }

  fn options(&self) -> RunOptions {
    RunOptions {
      namespace: "apps".into(),
      ..Default::default()
    }
  }
}

fn src(ws: &Path) -> String {
  ws.join("api/main.go").to_string_lossy().into_owned()
}

#[tokio::test]
async fn second_run_reuses_the_image() {
  let fx = Fixture::new().await;

  let (first, _) = run(&fx.executor, fx.options()).await;
  assert!(first.is_success());
  assert_eq!(first.succeeded[API], Outcome::Built);
  assert_eq!(first.succeeded[SVC], Outcome::Built);
  assert_eq!(fx.rec.registry.built().len(), 1);
  assert_eq!(fx.rec.cluster.applied().len(), 1);
  assert_eq!(fx.rec.cluster.applied()[0].0, "apps");

  let (second, _) = run(&fx.executor, fx.options()).await;
  assert_eq!(second.succeeded[API], Outcome::Cached);
  // deploys are not cacheable
  assert_eq!(second.succeeded[SVC], Outcome::Built);
  assert_eq!(fx.rec.registry.built().len(), 1);
  assert_eq!(fx.rec.cluster.applied().len(), 2);
}

#[tokio::test]
async fn pushed_images_are_pulled_on_a_fresh_machine() {
  let fx = Fixture::new().await;

  let push = RunOptions {
    push: true,
    ..fx.options()
  };
  run(&fx.executor, push).await;
  let pushed = fx.rec.registry.pushed();
  assert_eq!(pushed.len(), 1);
  assert!(pushed[0].starts_with("registry.local/api:"));

  fx.rec.registry.wipe_local();
  let pull = RunOptions {
    pull: true,
    ..fx.options()
  };
  let (summary, _) = run(&fx.executor, pull).await;
  assert_eq!(summary.succeeded[API], Outcome::Pulled);
  assert_eq!(fx.rec.registry.pulled(), pushed);
  assert_eq!(fx.rec.registry.built().len(), 1);
}

#[tokio::test]
async fn source_edits_change_every_downstream_hash() {
  let fx = Fixture::new().await;
  let (_, before) = run(&fx.executor, fx.options()).await;

  std::fs::write(PathBuf::from(src(fx.ws.path())), "package main // v2").unwrap();
  let (summary, after) = run(&fx.executor, fx.options()).await;

  assert_eq!(summary.succeeded[API], Outcome::Built);
  assert_ne!(success_hash(&before, API), success_hash(&after, API));
  assert_ne!(success_hash(&before, SVC), success_hash(&after, SVC));
  assert_eq!(fx.rec.registry.built().len(), 2);
}

#[tokio::test]
async fn events_follow_dependency_order() {
  let fx = Fixture::new().await;
  let (_, events) = run(&fx.executor, fx.options()).await;

  assert!(matches!(events.first(), Some(RunEvent::Started { .. })));
  assert!(matches!(events.last(), Some(RunEvent::Finished { .. })));

  let position = |pred: &dyn Fn(&RunEvent) -> bool| events.iter().position(pred).unwrap();
  let api_done = position(&|e| matches!(e, RunEvent::ActionSuccess(v) if v.key == API));
  let svc_derived = position(&|e| matches!(e, RunEvent::DerivationComputed(v) if v.key == SVC));
  let svc_started = position(&|e| matches!(e, RunEvent::ActionStarted(v) if v.key == SVC));
  assert!(api_done < svc_derived);
  assert!(svc_derived < svc_started);
}

#[tokio::test]
async fn isolating_the_image_leaves_the_deploy_alone() {
  let fx = Fixture::new().await;
  let options = RunOptions {
    target_keys: vec![API.into()],
    ..fx.options()
  };
  let (summary, _) = run(&fx.executor, options).await;
  assert_eq!(summary.succeeded.keys().collect::<Vec<_>>(), vec![API]);
  assert!(fx.rec.cluster.applied().is_empty());
}
