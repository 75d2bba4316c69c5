//! volagent - Host-side Volume Agent
//!
//! Startup sequencing: block until the volmaster's global configuration is
//! retrievable, reconcile mounts left behind by a previous process, then
//! bind the plugin socket and serve. The socket is never bound while the
//! cluster state is unknown.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volagent::{Agent, DriverRegistry, MasterClient, PluginServer, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Host-side volume agent for the volmaster control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Volmaster address (host:port or URL)
    #[arg(long, env = "MASTER", default_value = "127.0.0.1:9005")]
    master: String,

    /// Hostname label published with use leases (defaults to the system hostname)
    #[arg(long = "host-label", env = "HOST_LABEL")]
    host_label: Option<String>,

    /// Container runtime plugin directory
    #[arg(long, env = "PLUGINS_DIR", default_value = "/run/docker/plugins")]
    plugins_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let host = args.host_label.clone().unwrap_or_else(system_hostname);

    info!("Starting volagent");
    info!("  Version: {}", volagent::VERSION);
    info!("  Volmaster: {}", args.master);
    info!("  Host label: {}", host);
    info!("  Plugin directory: {}", args.plugins_dir.display());

    let master = Arc::new(MasterClient::new(&args.master, &host));

    // Block startup until cluster state is available: serving plugin RPCs
    // without a global configuration would answer from an unknown state.
    let global = loop {
        match master.get_global().await {
            Ok(global) => break global,
            Err(e) => {
                error!(master = %args.master, error = %e,
                    "Global configuration is missing; waiting for volmaster");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    };
    info!(master = %args.master, "Reached volmaster; continuing startup");

    // Storage backends register here. The stock binary links none; embedders
    // wire their drivers in before the agent is constructed.
    let drivers = DriverRegistry::new();
    if drivers.is_empty() {
        warn!("no storage backends registered; volume operations will be rejected");
    }

    let agent = Agent::new(master, drivers, global, host);

    agent.reconcile().await?;
    info!("Mount reconciliation complete");

    agent.clone().spawn_watch_global();

    let server = PluginServer::new(agent, &args.plugins_dir);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown.send(());
    });

    server.run().await?;

    info!("volagent shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap())
        .add_directive("axum=info".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Shutdown
// =============================================================================

fn system_hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
