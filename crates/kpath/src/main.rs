//! KPATH server binary
//!
//! Loads configuration from `KPATH_*` environment variables (with a few
//! CLI overrides), builds the runtime, performs the snapshot-aware cold
//! start, and serves the HTTP API until interrupted.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kpath_core::Config;
use kpath_server::build_runtime;

#[derive(Debug, Parser)]
#[command(name = "kpath", version, about = "Semantic capability discovery service")]
struct Cli {
    /// Bind host (overrides KPATH_HTTP_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides KPATH_HTTP_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides KPATH_DATABASE_URL)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Snapshot directory (overrides KPATH_SNAPSHOT_DIR)
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Skip the cold build; the index stays 503 until
    /// POST /api/v1/search/initialize
    #[arg(long)]
    defer_index: bool,
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.http_host = host;
    }
    if let Some(port) = cli.port {
        config.http_port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(snapshot_dir) = cli.snapshot_dir {
        config.snapshot_dir = snapshot_dir;
    }
    if let Err(err) = config.validate() {
        tracing::error!(%err, "invalid configuration");
        return std::process::ExitCode::FAILURE;
    }

    match run(config, cli.defer_index) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(config: Config, defer_index: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut runtime = build_runtime(&config)?;

    if defer_index {
        tracing::warn!("index build deferred; queries return 503 until initialized");
    } else {
        runtime.initialize_index()?;
    }

    let addr = config.http_addr();
    let app = kpath_server::router(runtime.state.clone());

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    tokio_runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "kpath listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
            })
            .await?;
        Ok::<(), std::io::Error>(())
    })?;

    runtime.shutdown();
    Ok(())
}
