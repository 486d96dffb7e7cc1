//! `dragnet-worker`, the long-lived scan worker process.
//!
//! Registers with the orchestrator, pulls sub-tasks, executes configured
//! engine adapters and streams progress back. Exits 0 on clean shutdown,
//! 1 on a fatal configuration error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, Level};

use dragnet_core::adaptive_config;
use dragnet_worker::{
    CommandEngine, EnginePipeline, HttpOrchestratorClient, WorkerConfig, WorkerRuntime,
};

/// Fallback per-engine timeout when the adaptive profile has no specific
/// figure for the module.
const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 3600;

#[derive(Parser)]
#[command(name = "dragnet-worker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dragnet scan worker", long_about = None)]
struct Cli {
    /// Orchestrator base URL
    #[arg(long, env = "DRAGNET_ORCHESTRATOR_URL", default_value = "http://127.0.0.1:8090")]
    orchestrator_url: String,

    /// Unique worker name in the fleet
    #[arg(long, env = "DRAGNET_WORKER_NAME", default_value = "dragnet-worker-1")]
    name: String,

    /// Parallel sub-task slots
    #[arg(long, env = "DRAGNET_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Local queue capacity
    #[arg(long, default_value_t = dragnet_worker::DEFAULT_MAX_QUEUE_SIZE)]
    max_queue_size: usize,

    /// Seconds a queued task may wait before expiring
    #[arg(long, default_value_t = 300)]
    max_wait_secs: u64,

    /// Engine adapter, `module=command line` (repeatable), e.g.
    /// `portScan=/usr/local/bin/naabu-adapter --json`
    #[arg(long = "engine", value_name = "MODULE=COMMAND")]
    engines: Vec<String>,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

fn build_pipeline(specs: &[String]) -> Result<EnginePipeline> {
    let adaptive = adaptive_config();
    let mut pipeline = EnginePipeline::new();

    for spec in specs {
        let Some((module, command_line)) = spec.split_once('=') else {
            bail!("invalid --engine value {spec:?}, expected MODULE=COMMAND");
        };
        let module = module.trim();
        if !dragnet_core::MODULE_KEYS.contains(&module) {
            bail!(
                "unknown engine module {module:?}, expected one of {:?}",
                dragnet_core::MODULE_KEYS
            );
        }
        let command: Vec<String> = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if command.is_empty() {
            bail!("engine module {module:?} has an empty command");
        }

        let timeout = match module {
            "fingerprint" => Duration::from_secs(adaptive.fingerprint_timeout_secs as u64),
            _ => Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
        };
        pipeline = pipeline.register(Arc::new(CommandEngine::new(module, command, timeout)));
    }

    Ok(pipeline)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    dragnet_core::init_tracing(cli.json, level);

    if cli.name.trim().is_empty() {
        bail!("worker name must not be empty");
    }

    // Sampled once; immutable for the process lifetime.
    let adaptive = adaptive_config();
    info!(
        worker = %cli.name,
        profile = adaptive.profile.as_str(),
        concurrency = cli.concurrency,
        "starting worker"
    );

    let pipeline = build_pipeline(&cli.engines).context("engine configuration")?;
    if pipeline.is_empty() {
        info!("no engine adapters configured; claimed modules will be skipped");
    }

    let client =
        HttpOrchestratorClient::new(&cli.orchestrator_url).context("orchestrator client")?;

    let runtime = WorkerRuntime::new(
        WorkerConfig {
            name: cli.name,
            concurrency: cli.concurrency,
            max_queue_size: cli.max_queue_size,
            max_wait_time: Duration::from_secs(cli.max_wait_secs),
            ..WorkerConfig::default()
        },
        Arc::new(client),
        pipeline,
    );

    {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            runtime.shutdown();
        });
    }

    runtime.run().await?;
    Ok(())
}
