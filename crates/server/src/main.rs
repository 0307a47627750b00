use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod api;
mod config;
mod middleware;

use config::{AppState, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "fastnow-gateway")]
#[command(about = "FastNow MCP gateway - exposes FastNow tools and widgets to AI agents", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "FASTNOW_CONFIG", default_value = "fastnow.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "FASTNOW_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fastnow=info,tower_http=info".into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting FastNow MCP gateway");

    // Load configuration
    let mut config = ServerConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    let state = AppState::new(&config)?;

    // Start API server
    let addr = config.bind_addr();
    tracing::info!(public_url = %config.public_url(), "Starting API server on {}", addr);

    api::serve(&addr, state).await?;

    Ok(())
}
