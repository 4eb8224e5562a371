//! xlrun backend server
//!
//! Entry point: configuration loading, job engine startup, and the HTTP server.

use std::sync::Arc;

use tokio::net::TcpListener;
use xlrun_backend::state::{run_session_reaper, AppState};
use xlrun_job_queue::JobQueue;
use xlrun_jobs::{builtin_routines, ExecutionAdapter};

mod cli;
mod config_helpers;
mod tracing_setup;

use cli::CliArgs;
use config_helpers::{parse_bind_address, queue_settings_from_config, shutdown_signal};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eprintln!("[STARTUP] xlrun backend starting...");
    let args = CliArgs::parse();

    if args.help_requested {
        CliArgs::print_help();
        return Ok(());
    }

    // Resolve config path: CLI > environment variable
    let config_path = args
        .config_path
        .or_else(|| std::env::var("XLRUN_CONFIG_PATH").ok());

    eprintln!("[STARTUP] Loading config from: {:?}", config_path);
    let config = load_config(&config_path)?;
    xlrun_config::validate_config(&config).map_err(|e| {
        eprintln!("invalid configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })?;
    eprintln!("[STARTUP] Config loaded successfully");

    eprintln!("[STARTUP] Initializing tracing...");
    install_tracing_from_config(&config.logging);

    let adapter = ExecutionAdapter::from_config(&config, builtin_routines())?;
    tracing::info!(
        entrypoint = %config.runner.entrypoint,
        mode = ?adapter.mode(),
        data_dir = %config.storage.data_dir,
        allowed_extensions = ?config.runner.allowed_extensions,
        max_upload_mb = config.runner.max_upload_mb,
        job_ttl_minutes = config.runner.job_ttl_minutes,
        "runner configuration"
    );

    eprintln!("[STARTUP] Preparing data directory...");
    tokio::fs::create_dir_all(&config.storage.data_dir).await?;

    eprintln!("[STARTUP] Starting job engine...");
    let job_queue = JobQueue::new(Arc::new(adapter), queue_settings_from_config(&config));
    job_queue.start()?;

    let state = Arc::new(AppState::new(config.clone(), job_queue.clone()));
    let settings = *job_queue.settings();
    let session_reaper = tokio::spawn(run_session_reaper(
        state.clone(),
        settings.ttl,
        settings.reap_interval,
    ));
    let app = xlrun_backend::build_router(state);

    let addr = parse_bind_address(&config.server.host, config.server.port);
    eprintln!("[STARTUP] Binding to {addr}");
    let listener = TcpListener::bind(addr).await?;
    eprintln!("[STARTUP] Server listening on {addr}");
    tracing::info!(%addr, "server listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    session_reaper.abort();
    // A running job finishes before the engine reports stopped.
    job_queue.shutdown().await;
    served?;
    Ok(())
}

/// Load configuration from file or defaults.
fn load_config(path: &Option<String>) -> anyhow::Result<xlrun_config::Config> {
    xlrun_config::load_config(path.as_deref()).map_err(|e| {
        eprintln!("failed to load configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })
}
