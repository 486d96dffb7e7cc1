//! `dragnetd`, the Dragnet orchestrator daemon.
//!
//! Serves the worker-facing HTTP API over the Redis-backed control plane.
//! Exits 0 on SIGTERM/ctrl-c after in-flight requests drain, non-zero on a
//! fatal configuration error.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use dragnet_orchestrator::{router, AppState};
use dragnet_state::{MemoryScanStore, RedisControlStore, ScanStore};

#[derive(Parser)]
#[command(name = "dragnetd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dragnet scan orchestration daemon", long_about = None)]
struct Cli {
    /// Redis URL for the control-plane store
    #[arg(long, env = "DRAGNET_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Listen address for the worker API
    #[arg(long, env = "DRAGNET_BIND", default_value = "0.0.0.0:8090")]
    bind: String,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    dragnet_core::init_tracing(cli.json, level);

    let control = RedisControlStore::connect(&cli.redis_url)
        .await
        .with_context(|| format!("cannot reach control store at {}", cli.redis_url))?;

    // The production scan-store adapter is wired in by the embedding
    // deployment; standalone runs keep task/asset state in memory.
    let scan: Arc<dyn ScanStore> = Arc::new(MemoryScanStore::new());

    let state = AppState::new(Arc::new(control), scan);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("cannot bind {}", cli.bind))?;
    info!(bind = %cli.bind, "dragnetd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("dragnetd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining");
}
