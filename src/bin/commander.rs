//! Coordinator process: HTTP API, status consumer and token issuance.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mission_control::auth::TokenCodec;
use mission_control::channel::RedisChannel;
use mission_control::config::MissionControlConfig;
use mission_control::coordinator::{self, CoordinatorService};
use mission_control::logging::init_logging;
use mission_control::registry::MissionRegistry;

/// Accepts missions, tracks their status and issues worker tokens
#[derive(Parser, Debug)]
#[command(name = "commander")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen port [default: 8080]
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Broker URL
    #[arg(long, env = "BROKER_URL")]
    broker_url: Option<String>,

    /// HMAC secret used to sign worker tokens
    #[arg(long, env = "TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// Validity of issued tokens in seconds [default: 30]
    #[arg(long, env = "TOKEN_TTL_SECS")]
    token_ttl_secs: Option<u64>,
}

impl Cli {
    fn resolve(self) -> Result<MissionControlConfig> {
        let mut config = match &self.config {
            Some(path) => MissionControlConfig::load(path)?,
            None => MissionControlConfig::default(),
        };

        if let Some(port) = self.port {
            config.coordinator.port = port;
        }
        if let Some(url) = self.broker_url {
            config.broker.url = url;
        }
        if let Some(secret) = self.token_secret {
            config.coordinator.token_secret = Some(secret);
        }
        if let Some(ttl) = self.token_ttl_secs {
            config.coordinator.token_ttl_secs = ttl;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let config = Cli::parse().resolve()?;
    let secret = config.coordinator.require_secret()?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let channel = RedisChannel::connect_with_retry(
        &config.broker.url,
        config.broker.connect_attempts,
        &shutdown,
    )
    .await
    .context("failed to connect to the message broker")?
    .with_prefix(&config.broker.prefix);

    let codec = TokenCodec::new(secret).with_validity(config.coordinator.token_ttl());
    let service = CoordinatorService::new(
        Arc::new(MissionRegistry::new()),
        Arc::new(channel),
        Arc::new(codec),
    );

    let consumer = service
        .spawn_status_consumer(shutdown.clone())
        .await
        .context("failed to subscribe to status updates")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.coordinator.port));
    coordinator::serve(coordinator::router(service), addr, shutdown.clone()).await?;

    shutdown.cancel();
    if let Err(err) = consumer.await {
        tracing::error!("Status consumer task failed: {}", err);
    }
    Ok(())
}

fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", err);
            return;
        }
        tracing::info!("Shutdown requested");
        shutdown.cancel();
    });
}
