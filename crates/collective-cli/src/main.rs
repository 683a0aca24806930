//! Collective command-line entry point
//!
//! - `collective serve` runs a collective behind the JSON-RPC HTTP server
//! - `collective config` prints the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use collective_api::{ApiConfig, ApiServer};
use collective_config::CollectiveConfig;
use collective_core::Collective;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "collective")]
#[command(about = "Multi-agent collective orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "COLLECTIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, global = true, env = "COLLECTIVE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the collective over HTTP
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CollectiveConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Config => print_config(&config, cli.config),
    }
}

async fn serve(config: CollectiveConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut api_config = ApiConfig::from(&config.server);
    if let Some(host) = host {
        api_config = api_config.with_host(host);
    }
    if let Some(port) = port {
        api_config = api_config.with_port(port);
    }

    let collective = Collective::new(config).context("Failed to start collective")?;
    tracing::info!(instance_id = %collective.instance_id(), "Collective ready");

    ApiServer::new(api_config, collective)
        .run_with_shutdown(shutdown_signal())
        .await
}

fn print_config(config: &CollectiveConfig, explicit: Option<PathBuf>) -> Result<()> {
    let source = explicit.or_else(|| CollectiveConfig::default_path().filter(|path| path.exists()));
    match source {
        Some(path) => println!("# {}", path.display()),
        None => println!("# built-in defaults"),
    }
    let rendered = config
        .to_toml_string()
        .context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
