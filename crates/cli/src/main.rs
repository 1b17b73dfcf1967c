mod cmd;
mod context;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{RunArgs, cmd_add, cmd_connect, cmd_edges, cmd_graph, cmd_hash, cmd_list, cmd_run, cmd_show};
use context::AppContext;
use output::{OutputFormat, print_error};

/// ark - Content-addressed build and deploy engine
#[derive(Parser)]
#[command(name = "ark")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  /// Start the workspace search here instead of the current directory
  #[arg(short = 'C', long, global = true)]
  workspace: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Add or replace targets from JSON files
  Add {
    /// Files holding one target object or an array of them
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },

  /// List every target
  List,

  /// Show a target and the artifact it derives to
  Show { key: String },

  /// Print the fingerprint of a target
  Hash {
    key: String,

    /// Print the short form
    #[arg(short, long)]
    short: bool,
  },

  /// List stored dependency edges
  Edges,

  /// Record that SRC depends on DST
  Connect { src: String, dst: String },

  /// Print the dependency graph
  Graph {
    /// Only the graph rooted at these targets
    keys: Vec<String>,

    /// Emit Graphviz DOT
    #[arg(long)]
    dot: bool,
  },

  /// Build, cache and deploy targets
  Run {
    /// Targets to run; everything when omitted
    keys: Vec<String>,

    /// Ignore every cache and always run actions
    #[arg(short, long)]
    force: bool,

    /// Fetch artifacts from the remote cache on a local miss
    #[arg(long)]
    pull: bool,

    /// Upload artifacts missing from the remote cache
    #[arg(long)]
    push: bool,

    /// Kubernetes namespace (default: from workspace settings)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Kubernetes context; must be a safe context
    #[arg(long)]
    kube_context: Option<String>,

    /// Maximum number of targets running at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Rerun targets whose source files change
    #[arg(short, long)]
    watch: bool,

    /// Use a running watchman daemon for change detection
    #[arg(long, requires = "watch")]
    watchman: bool,
  },
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "ark=debug" } else { "ark=info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    print_error(&format!("{e:#}"));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async {
    let ctx = AppContext::open(cli.workspace.as_deref()).await?;
    let output = cli.output;
    match cli.command {
      Commands::Add { files } => cmd_add(&ctx, &files, output).await,
      Commands::List => cmd_list(&ctx, output).await,
      Commands::Show { key } => cmd_show(&ctx, &key, output).await,
      Commands::Hash { key, short } => cmd_hash(&ctx, &key, short, output).await,
      Commands::Edges => cmd_edges(&ctx, output).await,
      Commands::Connect { src, dst } => cmd_connect(&ctx, &src, &dst).await,
      Commands::Graph { keys, dot } => cmd_graph(&ctx, &keys, dot, output).await,
      Commands::Run {
        keys,
        force,
        pull,
        push,
        namespace,
        kube_context,
        jobs,
        watch,
        watchman,
      } => {
        let args = RunArgs {
          keys,
          force,
          pull,
          push,
          namespace,
          kube_context,
          jobs,
          watch,
          watchman,
        };
        cmd_run(&ctx, args, output).await
      }
    }
  })
}
