//! Command-line entry point for the config-driven gateway.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gateway", version, about = "Config-driven HTTP gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a config file and serve the routes it declares.
    Serve {
        /// Path to the YAML config file.
        #[arg(long, short = 'c', default_value = "gateway.yaml")]
        config: PathBuf,
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
    /// Parse a config file and report whether it's valid, without serving.
    Validate {
        #[arg(long, short = 'c', default_value = "gateway.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, addr } => serve(config, addr).await,
        Command::Validate { config } => validate(config),
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<gateway_config::GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {e}", path.display()))?;
    let config: gateway_config::GatewayConfig = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config file '{}': {e}", path.display()))?;

    for (route_id, route) in &config.routes {
        route
            .validate()
            .map_err(|e| anyhow::anyhow!("route '{route_id}' is invalid: {e}"))?;
    }

    Ok(config)
}

fn validate(config: PathBuf) -> anyhow::Result<()> {
    let parsed = load_config(&config)?;
    tracing::info!(routes = parsed.routes.len(), "config is valid");
    Ok(())
}

async fn serve(config: PathBuf, addr: SocketAddr) -> anyhow::Result<()> {
    let parsed = load_config(&config)?;
    let route_count = parsed.routes.len();
    let state = gateway_http::state::AppState::from_config(parsed)?;
    let router = gateway_http::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, routes = route_count, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
