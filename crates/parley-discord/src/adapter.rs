use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use parley_agent::pipeline::Relay;
use parley_agent::ClassifiedError;
use parley_core::config::DiscordConfig;

use crate::error::DiscordError;
use crate::handler::DiscordHandler;

/// Discord gateway adapter.
///
/// Wraps a serenity `Client` and reconnects whenever the gateway drops. The
/// only way out of [`run`](Self::run) is a fatal upstream failure reported by
/// a turn, which is handed back to the caller to act on.
pub struct DiscordAdapter {
    relay: Arc<Relay>,
    config: DiscordConfig,
}

impl DiscordAdapter {
    pub fn new(config: &DiscordConfig, relay: Arc<Relay>) -> Result<Self, DiscordError> {
        if config.bot_token.trim().is_empty() {
            return Err(DiscordError::NoToken);
        }
        Ok(Self {
            relay,
            config: config.clone(),
        })
    }

    /// Connect to Discord and keep reconnecting until a turn reports a fatal error.
    pub async fn run(self) -> Result<(), DiscordError> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<ClassifiedError>();

        loop {
            let mut client = loop {
                match self.build_client(intents, fatal_tx.clone()).await {
                    Ok(c) => break c,
                    Err(e) => {
                        error!("Discord: connect failed ({e}), retrying in 30s");
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            };
            let shards = Arc::clone(&client.shard_manager);

            info!("Discord: gateway connecting");
            tokio::select! {
                res = client.start() => match res {
                    Err(e) => warn!("Discord: gateway error ({e}), reconnecting in 5s"),
                    Ok(()) => info!("Discord: gateway stopped cleanly, reconnecting in 5s"),
                },
                Some(fatal) = fatal_rx.recv() => {
                    error!(error = %fatal, "Discord: stopping after fatal upstream failure");
                    shards.shutdown_all().await;
                    return Err(DiscordError::Upstream(fatal));
                }
            }

            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    /// Build a fresh serenity `Client` with our event handler.
    async fn build_client(
        &self,
        intents: GatewayIntents,
        fatal: mpsc::UnboundedSender<ClassifiedError>,
    ) -> Result<Client, serenity::Error> {
        let handler = DiscordHandler {
            relay: Arc::clone(&self.relay),
            config: self.config.clone(),
            bot_id: OnceLock::new(),
            fatal,
        };

        Client::builder(&self.config.bot_token, intents)
            .event_handler(handler)
            .await
    }
}
