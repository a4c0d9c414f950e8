use std::sync::{Arc, OnceLock};

use serenity::all::ActivityData;
use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::UserId;
use serenity::model::user::OnlineStatus;
use serenity::prelude::{Context, EventHandler};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_agent::pipeline::{ChannelKind, InboundEvent, Relay, TurnError};
use parley_agent::ClassifiedError;
use parley_core::config::DiscordConfig;

use crate::send::DiscordOutbound;

/// Serenity event handler wired to the relay.
pub struct DiscordHandler {
    pub relay: Arc<Relay>,
    pub config: DiscordConfig,
    pub bot_id: OnceLock<UserId>,
    /// Fatal upstream failures are forwarded here for the adapter to act on.
    pub fatal: mpsc::UnboundedSender<ClassifiedError>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();

        let activity = self.config.activity_name.as_deref().map(ActivityData::playing);
        ctx.set_presence(activity, OnlineStatus::Online);

        info!(name = %ready.user.name, "Discord bot connected");

        if self.config.slash_commands {
            crate::commands::register_commands(&ctx).await;
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(event) = inbound_event(&msg, &self.config) else {
            return;
        };

        let Some(bot_id) = self.bot_id.get().map(|id| id.to_string()) else {
            return;
        };

        let relay = Arc::clone(&self.relay);
        let outbound = DiscordOutbound::new(Arc::clone(&ctx.http));
        let fatal = self.fatal.clone();

        tokio::spawn(async move {
            match relay.handle_event(&event, &bot_id, &outbound).await {
                Ok(outcome) => debug!(channel = %event.channel_id, ?outcome, "turn finished"),
                Err(TurnError::Fatal(e)) => {
                    // Receiver is gone only while the adapter is shutting down.
                    let _ = fatal.send(e);
                }
                Err(e) => warn!(channel = %event.channel_id, error = %e, "turn failed"),
            }
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if !self.config.slash_commands {
            return;
        }
        if let Interaction::Command(command) = interaction {
            crate::commands::handle_interaction(&self.relay, &ctx, &command).await;
        }
    }
}

/// Translate a Discord message into the platform-neutral event the relay consumes.
///
/// Returns `None` for messages the relay must never see: anything written by
/// a bot account (ours included) and DMs when they are disabled.
fn inbound_event(msg: &Message, config: &DiscordConfig) -> Option<InboundEvent> {
    if msg.author.bot {
        return None;
    }

    let channel_kind = if msg.guild_id.is_some() {
        ChannelKind::Guild
    } else {
        ChannelKind::DirectMessage
    };
    if channel_kind == ChannelKind::DirectMessage && !config.dm_allowed {
        debug!(channel = %msg.channel_id, "direct messages disabled, ignoring");
        return None;
    }

    Some(InboundEvent {
        channel_id: msg.channel_id.to_string(),
        author_id: msg.author.id.to_string(),
        raw_text: msg.content.clone(),
        mentions: msg.mentions.iter().map(|u| u.id.to_string()).collect(),
        channel_kind,
        reply_to: msg
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|id| id.to_string()),
        reply_to_author: msg
            .referenced_message
            .as_ref()
            .map(|m| m.author.id.to_string()),
    })
}
