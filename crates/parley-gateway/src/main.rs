use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::Parser;
use tracing::{error, info, warn};

use parley_agent::pipeline::Relay;
use parley_agent::{build_backend, classify};
use parley_core::config::ParleyConfig;
use parley_discord::DiscordAdapter;

/// Discord bot that relays conversations to a chat-completion model.
#[derive(Debug, Parser)]
#[command(name = "parley-gateway", version, about)]
struct Cli {
    /// Config file path. Falls back to PARLEY_CONFIG, then ~/.parley/parley.toml.
    #[arg(short, long)]
    config: Option<String>,

    /// Load and validate the config, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Credentials may live in a local .env; a missing file is fine.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley_gateway=info,parley_agent=info,parley_discord=info".into()
            }),
        )
        .init();

    let config = ParleyConfig::load(cli.config.as_deref()).context("loading config")?;
    config.validate().context("invalid config")?;

    if cli.check {
        info!(backend = ?config.agent.backend, model = %config.agent.model, "config ok");
        return Ok(());
    }

    let backend = build_backend(&config.agent, &config.providers)?;
    if let Err(e) = backend.initialize().await {
        let classified = classify(&e);
        if classified.is_fatal() {
            bail!("model backend rejected credentials: {classified}");
        }
        warn!(backend = %backend.name(), error = %classified, "backend initialization failed, continuing");
    }
    info!(backend = %backend.name(), model = %config.agent.model, "backend ready");

    let relay = Arc::new(Relay::from_config(&config, backend));

    let discord_cfg = config.discord.clone().unwrap_or_default();
    let adapter = DiscordAdapter::new(&discord_cfg, Arc::clone(&relay))?;

    info!("Discord bot starting");
    tokio::select! {
        res = adapter.run() => {
            if let Err(e) = res {
                // Invalid credentials end up here; exit non-zero and let the supervisor decide.
                error!(error = %e, "Discord adapter stopped");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(channels = relay.contexts().tracked_channels(), "shutting down");
        }
    }

    Ok(())
}
