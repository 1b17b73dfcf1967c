//! Build and deploy execution.
//!
//! A run loads the stored graph, isolates the part reachable from the
//! requested targets, validates it, and then walks it leaves first. Each
//! vertex derives its artifact from the hashes its dependencies produced in
//! the same run, so a change anywhere below a target changes its hash too.
//!
//! Per vertex:
//!
//! - not cacheable, or `force`: run the action, then push if applicable;
//! - local hit: push if applicable;
//! - local miss without `pull`: run the action, save local state, push;
//! - local miss with `pull`: pull on a remote hit, otherwise build as above.
//!
//! A remote probe that errors counts as a miss. Failures never stop
//! independent vertices; everything depending on a failed vertex is skipped.

pub mod events;
pub mod types;
pub mod watch;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::artifact::CacheConfig;
use crate::clients::Clients;
use crate::dag::{self, Dag, DagError};
use crate::storage::Store;
use crate::target::{Target, TargetError};
use crate::targets::{ActionContext, ActionError, ControlPlaneEnv, Derivation, TargetKind, derive};
use crate::util::hash::short_hash;

pub use events::{EventSink, GraphSnapshot, RunEvent, RunHandle, VertexInfo};
pub use types::{ExecuteError, Outcome, RunOptions, RunSummary, VertexError, default_concurrency};
pub use watch::watch;

/// Runs graphs out of a [`Store`] against one set of clients.
pub struct Executor {
  store: Arc<dyn Store>,
  cache: CacheConfig,
  clients: Clients,
  control_plane: Option<ControlPlaneEnv>,
}

impl Executor {
  pub fn new(store: Arc<dyn Store>, cache: CacheConfig, clients: Clients) -> Self {
    Self {
      store,
      cache,
      clients,
      control_plane: None,
    }
  }

  /// Inject control-plane settings into deployed workloads.
  pub fn with_control_plane(mut self, control_plane: Option<ControlPlaneEnv>) -> Self {
    self.control_plane = control_plane;
    self
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Start a run in the background and subscribe to its events.
  pub fn run(self: &Arc<Self>, options: RunOptions, cancel: CancellationToken) -> RunHandle {
    let id = Uuid::new_v4();
    let (sink, events) = EventSink::channel();
    let executor = self.clone();
    let task = tokio::spawn(async move { executor.execute(id, &options, cancel, &sink).await });
    RunHandle { id, events, task }
  }

  /// Load, isolate and validate the graph for `options`.
  pub async fn plan(&self, options: &RunOptions) -> Result<(Dag, BTreeMap<String, Target>), ExecuteError> {
    let graph = self.store.get_graph().await?;
    graph.validate()?;

    let dag = if options.target_keys.is_empty() {
      graph
    } else {
      for key in &options.target_keys {
        if !graph.has_vertex(key) {
          return Err(DagError::VertexNotFound(key.clone()).into());
        }
      }
      let roots: Vec<&str> = options.target_keys.iter().map(String::as_str).collect();
      graph.isolate_many(&roots)
    };

    let mut targets = BTreeMap::new();
    for key in dag.vertices() {
      targets.insert(key.to_string(), self.store.get_target_by_key(key).await?);
    }
    validate(&dag, &targets, options)?;
    Ok((dag, targets))
  }

  /// Run to completion, publishing to `events`.
  ///
  /// Vertex failures are reported in the summary, not as an error.
  pub async fn execute(
    &self,
    run_id: Uuid,
    options: &RunOptions,
    cancel: CancellationToken,
    events: &EventSink,
  ) -> Result<RunSummary, ExecuteError> {
    let (dag, targets) = self.plan(options).await?;
    info!(
      run_id = %run_id,
      targets = dag.len(),
      force = options.force,
      pull = options.pull,
      push = options.push,
      "starting run"
    );
    events.emit(RunEvent::Started {
      run_id,
      graph: GraphSnapshot::from(&dag),
    });

    let run = Arc::new(RunState {
      targets,
      hashes: DashMap::new(),
      outcomes: DashMap::new(),
      cache: self.cache.clone(),
      options: options.clone(),
      ctx: ActionContext {
        home: self.cache.home.clone(),
        namespace: options.namespace.clone(),
        clients: self.clients.clone(),
        control_plane: self.control_plane.clone(),
        cancel: cancel.clone(),
      },
      events: events.clone(),
    });

    let result = dag::walk(&dag, options.max_concurrency, cancel, |key| {
      let run = run.clone();
      let span = info_span!("vertex", target_key = %key, hash = tracing::field::Empty);
      async move { run.visit(&key).await }.instrument(span)
    })
    .await;

    let mut summary = RunSummary {
      run_id,
      ..Default::default()
    };
    for key in result.succeeded {
      let outcome = run.outcomes.get(&key).map(|o| *o).unwrap_or(Outcome::Built);
      summary.succeeded.insert(key, outcome);
    }
    for (key, err) in result.failed {
      summary.failed.insert(key, err.to_string());
    }
    for (key, panic) in result.panicked {
      let err = VertexError::Panicked(panic);
      events.emit(RunEvent::Failed {
        vertex: run.info(&key),
        error: err.to_string(),
      });
      summary.failed.insert(key, err.to_string());
    }
    for (key, cause) in result.skipped {
      warn!(target_key = %key, failed_dependency = %cause, "skipped");
      events.emit(RunEvent::Skipped {
        key: key.clone(),
        failed_dependency: cause.clone(),
      });
      summary.skipped.insert(key, cause);
    }
    summary.cancelled = result.cancelled;

    info!(
      run_id = %run_id,
      built = summary.count(Outcome::Built),
      cached = summary.count(Outcome::Cached),
      pulled = summary.count(Outcome::Pulled),
      failed = summary.failed.len(),
      skipped = summary.skipped.len(),
      cancelled = summary.cancelled.len(),
      "run finished"
    );
    events.emit(RunEvent::Finished {
      summary: summary.clone(),
    });
    Ok(summary)
  }
}

/// Reject a graph that cannot run: unknown types, invalid attributes, or a
/// deploy without a namespace.
fn validate(dag: &Dag, targets: &BTreeMap<String, Target>, options: &RunOptions) -> Result<(), ExecuteError> {
  let roots = dag.roots();
  dag.depth_first_walk(&roots, |key, _| {
    let target = targets
      .get(key)
      .ok_or_else(|| ExecuteError::Dag(DagError::VertexNotFound(key.to_string())))?;
    let kind = TargetKind::decode(target)?;
    if matches!(kind, TargetKind::Deploy(_)) && options.namespace.trim().is_empty() {
      return Err(TargetError::validation("namespace", format!("is required to deploy {key}")).into());
    }
    Ok(())
  })
}

/// State shared by every vertex task of one run.
struct RunState {
  targets: BTreeMap<String, Target>,
  /// Hash each vertex derived to in this run.
  hashes: DashMap<String, String>,
  outcomes: DashMap<String, Outcome>,
  cache: CacheConfig,
  options: RunOptions,
  ctx: ActionContext,
  events: EventSink,
}

impl RunState {
  fn info(&self, key: &str) -> VertexInfo {
    VertexInfo {
      key: key.to_string(),
      kind: self.targets.get(key).map(|t| t.kind.clone()).unwrap_or_default(),
      hash: self.hashes.get(key).map(|h| h.clone()).unwrap_or_default(),
    }
  }

  async fn visit(&self, key: &str) -> Result<(), VertexError> {
    let res = self.realize(key).await;
    match &res {
      Ok(outcome) => {
        self.outcomes.insert(key.to_string(), *outcome);
        self.events.emit(RunEvent::ActionSuccess(self.info(key)));
      }
      Err(e) => {
        error!(error = %e, "failed");
        self.events.emit(RunEvent::Failed {
          vertex: self.info(key),
          error: e.to_string(),
        });
      }
    }
    res.map(|_| ())
  }

  /// The stored target with each ancestor hash replaced by the hash that
  /// ancestor derived to in this run.
  fn resolve(&self, key: &str) -> Result<Target, VertexError> {
    let mut target = self
      .targets
      .get(key)
      .cloned()
      .ok_or_else(|| VertexError::Missing(key.to_string()))?;
    for dep in &mut target.depends_on {
      if let Some(hash) = self.hashes.get(&dep.key) {
        dep.hash = hash.clone();
      }
    }
    Ok(target)
  }

  async fn realize(&self, key: &str) -> Result<Outcome, VertexError> {
    let d = derive(&self.resolve(key)?, &self.cache)?;
    self.hashes.insert(key.to_string(), d.hash().to_string());
    tracing::Span::current().record("hash", short_hash(d.hash()));
    self.events.emit(RunEvent::DerivationComputed(VertexInfo::from(&d)));

    let (ctx, opts) = (&self.ctx, &self.options);
    if !d.cacheable() || opts.force {
      d.pre_build(ctx).await?;
      self.build(&d).await?;
      self.push_if_applicable(&d).await?;
      return Ok(Outcome::Built);
    }

    d.pre_build(ctx).await?;
    if d.locally_cached(ctx).await? {
      debug!("local cache hit");
      self.events.emit(RunEvent::ActionCached(VertexInfo::from(&d)));
      self.push_if_applicable(&d).await?;
      return Ok(Outcome::Cached);
    }

    if opts.pull && self.remotely_cached(&d).await {
      d.pull(ctx).await?;
      info!("pulled from remote cache");
      self.events.emit(RunEvent::ArtifactPulled(VertexInfo::from(&d)));
      return Ok(Outcome::Pulled);
    }

    self.build(&d).await?;
    d.save_local_state(&ctx.home)?;
    self.push_if_applicable(&d).await?;
    Ok(Outcome::Built)
  }

  async fn build(&self, d: &Derivation) -> Result<(), ActionError> {
    if self.ctx.cancel.is_cancelled() {
      return Err(ActionError::Cancelled);
    }
    info!(kind = %d.target.kind, "running action");
    self.events.emit(RunEvent::ActionStarted(VertexInfo::from(d)));
    d.build(&self.ctx).await?;
    info!("action succeeded");
    Ok(())
  }

  /// Remote probe; errors count as a miss.
  async fn remotely_cached(&self, d: &Derivation) -> bool {
    match d.remotely_cached(&self.ctx).await {
      Ok(found) => found,
      Err(e) => {
        warn!(error = %e, "remote cache probe failed, treating as a miss");
        false
      }
    }
  }

  async fn push_if_applicable(&self, d: &Derivation) -> Result<(), ActionError> {
    if !d.cacheable() || !self.options.push {
      return Ok(());
    }
    if self.remotely_cached(d).await {
      debug!("already in remote cache");
      return Ok(());
    }
    self.events.emit(RunEvent::ArtifactPushStarted(VertexInfo::from(d)));
    d.push(&self.ctx).await?;
    info!("pushed to remote cache");
    Ok(())
  }
}
