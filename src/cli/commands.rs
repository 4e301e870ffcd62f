//! CLI command definitions for crabload.
//!
//! `crabload master` distributes a concurrency budget and a task plan to
//! connected workers; `crabload worker` connects to a master and executes
//! what it is sent. Flags override `CRABLOAD_*` environment variables.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::config::{load_task_plan, optional_secs, MasterConfig, WaitConfig, WorkerConfig};
use crate::error::TransportError;
use crate::master::Master;
use crate::metrics::init_metrics;
use crate::task::{HttpExecutor, Task};
use crate::worker::Worker;

/// Distributed HTTP load generator.
#[derive(Parser)]
#[command(name = "crabload")]
#[command(about = "Distributed HTTP load generator with a master/worker topology")]
#[command(version)]
#[command(
    long_about = "crabload splits a concurrency budget across the workers connected to a master.\n\nThe master sends every worker each planned task once, then keeps the connection alive with heartbeats.\n\nExample usage:\n  crabload master --concurrency 12 --task \"GET http://localhost:8080/\"\n  crabload worker --master 127.0.0.1:9000"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Accept workers and distribute the task plan.
    Master(MasterArgs),

    /// Connect to a master and execute its tasks.
    Worker(WorkerArgs),
}

/// Arguments for the master command.
#[derive(Parser, Debug)]
pub struct MasterArgs {
    /// Address to listen on (default: 0.0.0.0:9000).
    #[arg(long)]
    pub listen: Option<String>,

    /// Total concurrency budget shared by all workers (default: 12).
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Task descriptor such as "GET http://host/path". Repeatable.
    #[arg(short = 't', long = "task")]
    pub tasks: Vec<String>,

    /// YAML file with a `tasks:` list, appended after --task values.
    #[arg(long)]
    pub tasks_file: Option<PathBuf>,

    /// Seconds between heartbeats once the plan is exhausted (default: 5).
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,

    /// Deadline for each write and result read in seconds, 0 disables (default: 120).
    #[arg(long)]
    pub io_timeout_secs: Option<u64>,

    /// Seconds to wait for sessions after a shutdown signal before aborting
    /// them, 0 waits for all of them (default: 0).
    #[arg(long)]
    pub shutdown_timeout_secs: Option<u64>,
}

/// Arguments for the worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Master address (default: 127.0.0.1:9000).
    #[arg(short = 'm', long)]
    pub master: Option<String>,

    /// Lower bound of the random pause before each request, in milliseconds.
    #[arg(long, requires = "wait_max_ms", conflicts_with = "wait_fixed_ms")]
    pub wait_min_ms: Option<u64>,

    /// Upper bound (exclusive) of the random pause, in milliseconds.
    #[arg(long, requires = "wait_min_ms", conflicts_with = "wait_fixed_ms")]
    pub wait_max_ms: Option<u64>,

    /// Constant pause before each request, in milliseconds.
    #[arg(long)]
    pub wait_fixed_ms: Option<u64>,

    /// Pause after each heartbeat in seconds (default: 5).
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,

    /// Read deadline in seconds, must exceed the heartbeat, 0 disables (default: 0).
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,

    /// Write deadline in seconds, 0 disables (default: 10).
    #[arg(long)]
    pub write_timeout_secs: Option<u64>,

    /// Per-request HTTP timeout in seconds (default: 30).
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Print the final summary as JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl MasterArgs {
    /// Applies the flags on top of `config`.
    fn apply(self, mut config: MasterConfig) -> anyhow::Result<MasterConfig> {
        if let Some(listen) = self.listen {
            config = config.with_listen_addr(listen);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_total_concurrency(concurrency);
        }
        if let Some(secs) = self.heartbeat_secs {
            config = config.with_heartbeat_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.io_timeout_secs {
            config = config.with_io_timeout(optional_secs(secs));
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            config = config.with_shutdown_timeout(optional_secs(secs));
        }

        if !self.tasks.is_empty() || self.tasks_file.is_some() {
            let mut tasks: Vec<Task> = self.tasks.into_iter().map(Task::new).collect();
            if let Some(path) = self.tasks_file {
                tasks.extend(load_task_plan(&path)?);
            }
            config = config.with_tasks(tasks);
        }

        Ok(config)
    }
}

impl WorkerArgs {
    /// Applies the flags on top of `config`.
    fn apply(&self, mut config: WorkerConfig) -> WorkerConfig {
        if let Some(master) = &self.master {
            config = config.with_master_addr(master.clone());
        }
        if let Some(ms) = self.wait_fixed_ms {
            config = config.with_wait(WaitConfig::Fixed(Duration::from_millis(ms)));
        } else if let (Some(min), Some(max)) = (self.wait_min_ms, self.wait_max_ms) {
            config = config.with_wait(WaitConfig::Random {
                min: Duration::from_millis(min),
                max: Duration::from_millis(max),
            });
        }
        if let Some(secs) = self.heartbeat_secs {
            config = config.with_heartbeat_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.read_timeout_secs {
            config = config.with_read_timeout(optional_secs(secs));
        }
        if let Some(secs) = self.write_timeout_secs {
            config = config.with_write_timeout(optional_secs(secs));
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        config
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    match cli.command {
        Commands::Master(args) => run_master_command(args).await,
        Commands::Worker(args) => run_worker_command(args).await,
    }
}

async fn run_master_command(args: MasterArgs) -> anyhow::Result<()> {
    let config = args.apply(MasterConfig::from_env()?)?;
    if config.tasks.is_empty() {
        warn!("Task plan is empty, workers will only receive heartbeats");
    }

    let master = Master::bind(config).await?;
    master.run(shutdown_signal()).await?;
    Ok(())
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    let config = args.apply(WorkerConfig::from_env()?);
    config.validate()?;

    let executor = Arc::new(HttpExecutor::new(config.request_timeout)?);
    let wait = config.wait.build()?;
    let mut worker = Worker::connect(config, executor, wait).await?;

    let outcome = worker.run(shutdown_signal()).await;
    let summary = worker.summary().await;

    info!(
        tasks_run = summary.session.tasks_run,
        heartbeats = summary.session.heartbeats,
        responses = summary.results.responses(),
        failures = summary.results.failures,
        average_latency_ms = summary.results.average_latency_ms,
        "Worker finished"
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    match outcome {
        Ok(()) => Ok(()),
        Err(TransportError::Closed) => Err(anyhow::anyhow!("Master closed the connection")),
        Err(e) => Err(e.into()),
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C only on non-unix platforms).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Failed to listen for Ctrl-C");
                        }
                    }
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    }

    info!("Shutdown signal received");
}
