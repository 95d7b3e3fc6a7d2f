//! Blobs Local - local storage server
//!
//! Serves a directory as a blobs store for offline development. Settings
//! are layered: defaults, then an optional config file, then `BLOBS_*`
//! environment variables, then command line flags.

use anyhow::{Context, Result};
use blobs_common::ServerConfig;
use blobs_server::LocalServer;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "blobs-local")]
#[command(about = "Local blobs storage server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "BLOBS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the stored blobs
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Bearer token clients must present (omit for trusted mode)
    #[arg(long)]
    token: Option<String>,

    /// Base URL advertised in signed URLs
    #[arg(long)]
    public_url: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Merge defaults, the config file and the environment, then apply flags
fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }
    let mut server: ServerConfig = builder
        .add_source(config::Environment::with_prefix("BLOBS"))
        .build()
        .context("failed to load configuration")?
        .try_deserialize()
        .context("invalid configuration")?;

    if let Some(directory) = &args.directory {
        server.directory.clone_from(directory);
    }
    if let Some(listen) = args.listen {
        server.listen = listen;
    }
    if let Some(token) = &args.token {
        server.token = Some(token.clone());
    }
    if let Some(public_url) = &args.public_url {
        server.public_url = Some(public_url.clone());
    }
    Ok(server)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;
    info!("Starting blobs local server");
    info!("Data directory: {}", config.directory.display());
    if config.token.is_some() {
        info!("Authentication is ENABLED");
    } else {
        info!("Authentication is DISABLED (trusted local mode)");
    }

    let server = LocalServer::bind(config)
        .await
        .context("failed to start server")?;
    info!("Base URL: {}", server.base_url());

    server
        .serve(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}
