//! agent-gateway 服务端：加载配置、启动维护任务并提供 HTTP 接口
//!
//! Usage:
//!   agent-gateway [--config <path>] serve [--host <addr>] [--port <port>]
//!   agent-gateway [--config <path>] check-config

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_gateway::config::GatewayConfig;
use agent_gateway::gateway::GatewayBuilder;
use agent_gateway::maintenance::spawn_maintenance;

#[derive(Parser, Debug)]
#[command(name = "agent-gateway", version, about = "Rate-limited, caching gateway for AI agent backends")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "AGENT_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Overrides `server.host`
        #[arg(long)]
        host: Option<String>,
        /// Overrides `server.port`
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Command::Serve { host, port } => serve(config, host, port).await,
    }
}

async fn serve(config: GatewayConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;

    let gateway = GatewayBuilder::from_config(&config)?.build()?;
    let maintenance = spawn_maintenance(
        gateway.clone(),
        config.maintenance.interval(),
        config.maintenance.bucket_idle(),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        signal.cancel();
    });

    agent_gateway::server::serve(gateway, addr, shutdown).await?;
    maintenance.shutdown().await;
    Ok(())
}
