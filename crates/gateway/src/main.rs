use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kindred_config::AppConfig;

#[derive(Parser)]
#[command(name = "kindred-gateway", version, about = "Kindred companion gateway")]
struct Cli {
    /// Config file (default: kindred.toml in the working directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    kindred_gateway::start(config).await
}
