//! Icecast Server - a standalone Icecast-compatible audio broadcast server.
//!
//! One Tokio multi-thread runtime runs everything: there's no UI thread to
//! protect, so unlike a desktop-embedded variant of this engine, no
//! dedicated streaming runtime is needed.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use icecast_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Icecast Server - headless audio broadcast server.
#[derive(Parser, Debug)]
#[command(name = "icecast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ICECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "ICECAST_BIND_PORT")]
    port: Option<u16>,

    /// Bind address (overrides config file).
    #[arg(short = 'b', long, env = "ICECAST_BIND_ADDR")]
    bind: Option<String>,

    /// Data directory for persistent state.
    #[arg(short = 'd', long, env = "ICECAST_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Icecast Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    log::info!(
        "configuration: bind={}:{}, mounts={}",
        config.bind_addr,
        config.bind_port,
        config.mounts.len()
    );

    let core_config = config.to_core_config();
    let services = bootstrap_services(core_config).context("failed to bootstrap services")?;

    log::info!("services bootstrapped, {} mount(s) ready", services.registry.mount_count());

    let app_state = AppState {
        registry: services.registry.clone(),
        auth_lockout: services.auth_lockout.clone(),
        cancel_token: services.cancel_token.clone(),
    };

    let bind_addr = config.bind_addr.clone();
    let bind_port = config.bind_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, &bind_addr, bind_port).await {
            log::error!("server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", config.bind_port);

    wait_for_signal(services.registry.clone(), args.config.clone(), &services.cancel_token).await;

    log::info!("shutdown signal received, cleaning up...");
    services.shutdown();

    let grace = std::time::Duration::from_secs(config.shutdown_grace_secs);
    if tokio::time::timeout(grace, server_handle).await.is_err() {
        log::warn!("server task did not finish within the grace period, dropping it");
    }

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM to initiate shutdown; on Unix, also watches
/// for SIGHUP to hot-reload the mount registry's configuration without
/// dropping active sources.
/// Reloads configuration from `config_path` (or defaults, if unset) and
/// applies it to the registry. A parse failure is logged and otherwise
/// ignored — the registry keeps running its previous configuration.
fn reload_config(registry: &icecast_core::MountRegistry, config_path: Option<&PathBuf>) {
    match ServerConfig::load(config_path.map(|p| p.as_path())) {
        Ok(config) => {
            if let Err(err) = registry.apply_config(config.to_core_config()) {
                log::warn!("configuration reload failed: {}", err);
            } else {
                log::info!("configuration reloaded");
            }
        }
        Err(err) => log::warn!("failed to read configuration for reload: {}", err),
    }
}

#[cfg(unix)]
async fn wait_for_signal(
    registry: std::sync::Arc<icecast_core::MountRegistry>,
    config_path: Option<PathBuf>,
    cancel: &tokio_util::sync::CancellationToken,
) {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
        .expect("failed to install SIGHUP handler");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = cancel.cancelled() => break,
            _ = hangup.recv() => {
                log::info!("SIGHUP received, reloading configuration");
                reload_config(&registry, config_path.as_ref());
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(
    _registry: std::sync::Arc<icecast_core::MountRegistry>,
    _config_path: Option<PathBuf>,
    cancel: &tokio_util::sync::CancellationToken,
) {
    tokio::select! {
        _ = signal::ctrl_c() => {},
        _ = cancel.cancelled() => {},
    }
}
