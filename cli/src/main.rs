//! EVCS gateway CLI server
//!
//! ```sh
//! # Run with default config (~/.config/evcs-gateway/config.toml)
//! evcs-gateway
//!
//! # Custom config path and port overrides
//! evcs-gateway --config /etc/evcs-gateway/config.toml --ws-port 9000
//!
//! # Validate config without starting
//! evcs-gateway --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use evcs_gateway::config::AppConfig;
use evcs_gateway::server::{init_tracing, install_metrics_recorder, GatewayServer};
use evcs_gateway::support::shutdown::listen_for_shutdown_signals;

/// Gateway between EV charging devices (OCPP 1.6, CloudCharge) and the backend.
#[derive(Parser, Debug)]
#[command(
    name = "evcs-gateway",
    version,
    about = "Multi-protocol EV charging device gateway",
    long_about = "OCPP-J WebSocket endpoint plus signed CloudCharge HTTP API.\n\n\
                  Default config: ~/.config/evcs-gateway/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "EVCS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the OCPP WebSocket listen port.
    #[arg(long)]
    ws_port: Option<u16>,

    /// Override the HTTP API listen port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(evcs_gateway::default_config_path);

    // An explicit path must exist; the default one may be absent.
    let loaded = if cli.config.is_some() {
        AppConfig::load(&config_path)
    } else {
        AppConfig::load_or_default(&config_path)
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    if let Some(port) = cli.ws_port {
        config.server.ws_port = port;
    }
    if let Some(port) = cli.api_port {
        config.server.api_port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);
    info!("Configuration loaded from {}", config_path.display());

    if cli.check {
        println!("Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!("   WS address  : {}", config.server.ws_address());
        println!("   API address : {}", config.server.api_address());
        println!("   Protocol    : {}", config.protocol.default_protocol);
        println!("   Log level   : {}", config.logging.level);
        return Ok(());
    }

    let mut gateway = GatewayServer::new(config)?;
    if let Some(handle) = install_metrics_recorder() {
        gateway = gateway.with_metrics(handle);
    }

    let handle = match gateway.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Gateway failed to start");
            return Err(e.into());
        }
    };

    tokio::spawn(listen_for_shutdown_signals(handle.shutdown_signal()));
    info!("Press Ctrl+C to shut down gracefully");

    handle.shutdown_signal().wait().await;
    handle.shutdown().await;

    Ok(())
}
