//! tapproxy - Passive TCP session proxy fed by live packet capture
//!
//! This binary captures traffic for one fronted service, reassembles its
//! TCP flows into sessions, and processes them across a worker pool.
//! Process signals map to control events: SIGINT/SIGTERM stop the proxy,
//! SIGUSR1 reloads TLS credentials, SIGUSR2 logs a status snapshot.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use tapproxy::{config, Config, ControlHandle, LoggingHandler, Proxy, Result};

#[derive(Parser)]
#[command(name = "tapproxy")]
#[command(version)]
#[command(about = "Passive TCP session proxy fed by live packet capture")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override capture interface
    #[arg(long)]
    interface: Option<String>,

    /// Service address to observe (required without --config)
    #[arg(long)]
    service_address: Option<String>,

    /// Service port to observe (required without --config)
    #[arg(long)]
    service_port: Option<u16>,

    /// Override worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration: file if given, otherwise built from the service
    // flags.
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => match (&cli.service_address, cli.service_port) {
            (Some(address), Some(port)) => Config::with_service(address.clone(), port),
            _ => {
                eprintln!("error: either --config or both --service-address and --service-port are required");
                std::process::exit(2);
            }
        },
    };

    // Apply CLI overrides
    if let Some(interface) = cli.interface {
        config.capture.interface = interface;
    }
    if let Some(address) = cli.service_address {
        config.service.address = address;
    }
    if let Some(port) = cli.service_port {
        config.service.port = port;
    }
    if let Some(workers) = cli.workers {
        config.workers.count = workers;
    }

    // Initialize logging
    // Priority: --verbose flag, then RUST_LOG env var, then config level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting tapproxy v{}", env!("CARGO_PKG_VERSION"));

    let proxy = Proxy::new(config, Arc::new(LoggingHandler))?;
    let metrics = proxy.metrics();

    install_signal_handlers(proxy.control());

    let result = proxy.run().await;
    if let Err(ref e) = result {
        error!("Proxy error: {}", e);
    }

    info!(
        "Shutdown complete. Frames captured: {}, sessions opened: {}",
        metrics.snapshot().frames_captured,
        metrics.snapshot().sessions_opened,
    );

    result
}

/// Translate process signals into control events.
#[cfg(unix)]
fn install_signal_handlers(control: ControlHandle) {
    use tokio::signal;
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let stop_control = control.clone();
    tokio::spawn(async move {
        let mut sigterm =
            unix_signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
        stop_control.shutdown();
    });

    tokio::spawn(async move {
        let mut usr1 =
            unix_signal(SignalKind::user_defined1()).expect("Failed to install SIGUSR1 handler");
        let mut usr2 =
            unix_signal(SignalKind::user_defined2()).expect("Failed to install SIGUSR2 handler");
        loop {
            tokio::select! {
                _ = usr1.recv() => {
                    info!("Received SIGUSR1, reloading TLS credentials");
                    control.reload_tls();
                }
                _ = usr2.recv() => {
                    info!("Received SIGUSR2, dumping status");
                    control.dump_status();
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(control: ControlHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating shutdown...");
            control.shutdown();
        }
    });
}
