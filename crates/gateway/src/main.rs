//! Conflux MCP gateway binary.
//!
//! Loads the gateway config, connects every backend, and serves the
//! aggregated MCP surface over streamable HTTP until SIGINT/SIGTERM.

use clap::Parser;
use conflux_analytics::{AnalyticsCollector, build_exporter};
use conflux_gateway::{Gateway, GatewayAnalytics, GatewayConfig, McpListener};
use std::io::{IsTerminal as _, stdout};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI arguments for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "conflux-gateway")]
#[command(version, about = "Aggregating MCP gateway over HTTP and stdio backends")]
struct CliArgs {
    /// Path to the gateway config file (YAML or JSON).
    #[arg(short = 'c', long = "config", env = "CONFLUX_CONFIG")]
    config: PathBuf,

    /// HTTP bind address (ip:port); overrides the config file.
    #[arg(short = 'b', long, env = "CONFLUX_BIND")]
    bind: Option<String>,

    /// Log level. Supports tracing filter syntax.
    #[arg(short = 'l', long = "log-level", env = "CONFLUX_LOG", default_value = "info")]
    log_level: String,

    /// Print the parsed configuration and exit.
    #[arg(long = "print-effective-config")]
    print_effective_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    let mut config = GatewayConfig::load(&cli.config)?;
    if let Some(bind) = &cli.bind {
        config.bind = bind.clone();
    }

    if cli.print_effective_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    init_logging(&cli.log_level);
    tracing::info!("Starting Conflux MCP gateway v{}", VERSION);

    if config.servers.is_empty() {
        tracing::warn!("No backends configured. Gateway will start but expose no tools.");
    }

    let addr: SocketAddr = config
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", config.bind, e))?;

    let collector = config.analytics.as_ref().map(|analytics| {
        let exporter = build_exporter(analytics);
        AnalyticsCollector::new(analytics.clone(), exporter)
    });
    let analytics = collector.clone().map(GatewayAnalytics::from_collector);

    let gateway = Gateway::new(config)?;
    tracing::info!("Connecting backends...");
    gateway.connect().await?;
    for backend in gateway.backends() {
        tracing::info!(
            backend = %backend.name,
            tools = backend.tools.len(),
            connected = backend.connected,
            "backend ready"
        );
    }

    let listener = Arc::new(McpListener::new(gateway, analytics));
    let serve_listener = listener.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = serve_listener.serve(addr).await {
            tracing::error!(error = %e, "http server stopped with error");
        }
    });

    shutdown_signal().await;

    listener.shutdown().await;
    if let Some(collector) = collector
        && let Err(e) = collector.shutdown().await
    {
        tracing::warn!(error = %e, "final analytics flush failed");
    }
    let _ = server.await;

    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

/// Initialize logging based on the log level string.
fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if stdout().is_terminal() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
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
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
