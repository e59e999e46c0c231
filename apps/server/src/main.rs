//! Embercast Server - standalone headless streaming server.
//!
//! Binds the HTTP surface, builds the mount registry from configuration,
//! and runs until a shutdown signal arrives. Sources and listeners connect
//! to the same port; admin and status endpoints live beside the mounts.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use embercast_core::{start_server, AppState, MountRegistry};
use tokio::signal;

use crate::config::ServerConfig;

/// Embercast Server - Icecast-compatible live audio streaming server.
#[derive(Parser, Debug)]
#[command(name = "embercast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "EMBERCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "EMBERCAST_PORT")]
    port: Option<u16>,

    /// Source password (overrides config file).
    #[arg(short = 's', long, env = "EMBERCAST_PASSWORD")]
    source_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Embercast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(password) = args.source_password {
        config.source_password = password;
    }

    let core_config = config.to_core_config();
    core_config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    log::info!(
        "Configuration: bind={}:{}, {} configured mount(s)",
        config.bind_address,
        config.bind_port,
        core_config.mounts.len()
    );

    let registry = Arc::new(MountRegistry::new(core_config));
    let state = AppState::new(Arc::clone(&registry));

    // Directory announcements, if configured
    let announcer = embercast_core::yp::spawn_announcer(Arc::clone(&registry), config.bind_port);
    if announcer.is_some() {
        log::info!("Directory announcements enabled");
    }

    // Spawn the HTTP server; sources, listeners, status and admin all
    // share the one listening port.
    let addr = SocketAddr::new(config.bind_address, config.bind_port);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(state, addr).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Kill sources so their ingest loops detach cleanly, then stop serving.
    for stats in registry.list() {
        if let Some(mount) = registry.get(&stats.path) {
            mount.kill_source();
            mount.disconnect_all_listeners();
        }
    }
    if let Some(handle) = announcer {
        handle.abort();
    }
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
