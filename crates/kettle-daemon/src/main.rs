//! kettled - compile-and-run sandbox daemon
//!
//! Listens on a Unix socket and runs every `CompileAndRun` request through
//! one shared [`kettle_core::Sandbox`]. SIGTERM or SIGINT stops accepting
//! connections and waits for in-flight programs before exiting.

use anyhow::Result;
use futures::StreamExt;
use kettle_core::Sandbox;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("kettle_core=info".parse()?)
                .add_directive("kettled=info".parse()?),
        )
        .init();

    tracing::info!("kettled starting");

    // Load config
    let config = DaemonConfig::from_env()?;
    tracing::info!(
        socket = ?config.socket_path,
        temp_root = ?config.sandbox.temp_root,
        max_concurrent = config.sandbox.max_concurrent,
        "configuration loaded"
    );

    // Create socket directory if needed
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Remove stale socket
    let _ = std::fs::remove_file(&config.socket_path);

    let listener = UnixListener::bind(&config.socket_path)?;
    tracing::info!(socket = ?config.socket_path, "listening");

    let sandbox = Arc::new(Sandbox::new(config.sandbox.clone())?);

    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    let signals_handle = signals.handle();
    let shutdown = async move {
        if let Some(signal) = signals.next().await {
            tracing::info!(signal, "shutdown requested");
        }
    };

    server::run(listener, Arc::clone(&sandbox), shutdown).await?;

    signals_handle.close();
    sandbox.shutdown().await;
    let _ = std::fs::remove_file(&config.socket_path);

    tracing::info!("kettled stopped");
    Ok(())
}
