//! Worker process: executes missions from the orders queue and keeps its
//! token renewed.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mission_control::auth::{HttpTokenClient, TokenManager};
use mission_control::channel::RedisChannel;
use mission_control::config::MissionControlConfig;
use mission_control::logging::init_logging;
use mission_control::worker::{SimulatedExecutor, WorkerPool};

/// Executes missions with a bounded number of concurrent slots
#[derive(Parser, Debug)]
#[command(name = "soldier")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Maximum missions executed at once [default: 5]
    #[arg(long, env = "CONCURRENCY")]
    concurrency: Option<usize>,

    /// Identity tokens are issued for [default: soldier-1]
    #[arg(long, env = "SOLDIER_ID")]
    soldier_id: Option<String>,

    /// Coordinator base URL used for token issuance and renewal
    #[arg(long, env = "COMMANDER_URL")]
    commander_url: Option<String>,

    /// Pre-provisioned token; when absent one is requested from the coordinator
    #[arg(long, env = "INITIAL_TOKEN", hide_env_values = true)]
    initial_token: Option<String>,

    /// Broker URL
    #[arg(long, env = "BROKER_URL")]
    broker_url: Option<String>,
}

impl Cli {
    fn resolve(self) -> Result<(MissionControlConfig, Option<String>)> {
        let mut config = match &self.config {
            Some(path) => MissionControlConfig::load(path)?,
            None => MissionControlConfig::default(),
        };

        if let Some(concurrency) = self.concurrency {
            config.worker.concurrency = concurrency;
        }
        if let Some(id) = self.soldier_id {
            config.worker.soldier_id = id;
        }
        if let Some(url) = self.commander_url {
            config.worker.commander_url = url;
        }
        if let Some(url) = self.broker_url {
            config.broker.url = url;
        }

        config.validate()?;
        let initial_token = self.initial_token.filter(|token| !token.is_empty());
        Ok((config, initial_token))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let (config, initial_token) = Cli::parse().resolve()?;
    let identity = config.worker.soldier_id.clone();

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

    let client = Arc::new(HttpTokenClient::new(&config.worker.commander_url)?);
    let (token, expires_in) = match initial_token {
        Some(token) => (token, config.worker.initial_token_ttl()),
        None => {
            let grant = client
                .issue(&identity)
                .await
                .context("failed to acquire an initial token")?;
            (grant.token, grant.expires_in)
        },
    };

    let tokens = TokenManager::new(&identity, client)
        .with_policy(config.renewal.policy())
        .with_parent_cancellation(&shutdown);
    let renewal = tokens.start(token, expires_in)?;

    let pool = WorkerPool::new(
        Arc::new(channel),
        tokens.clone(),
        Arc::new(SimulatedExecutor::new(&config.simulation)),
        &config.worker,
    )
    .with_parent_cancellation(&shutdown);

    tracing::info!(
        "Starting soldier {} with concurrency {}",
        identity,
        pool.concurrency()
    );
    pool.start().await?;

    tokens.stop();
    if let Err(err) = renewal.await {
        tracing::error!("Token renewal task failed: {}", err);
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
