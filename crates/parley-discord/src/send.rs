//! Outbound side of the Discord adapter.
//!
//! Chunking happens upstream in the relay; every `send` here is exactly one
//! Discord message.

use std::num::NonZeroU64;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::id::ChannelId;
use tracing::debug;

use parley_agent::pipeline::{Outbound, SendError, TypingGuard};

/// Posts relay output through Discord's REST API.
///
/// Holds only the `Arc<Http>` REST client, so it stays valid across gateway
/// reconnects.
#[derive(Clone)]
pub struct DiscordOutbound {
    http: Arc<Http>,
}

impl DiscordOutbound {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Outbound for DiscordOutbound {
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError> {
        let channel = parse_channel_id(channel_id)?;
        channel
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(|e| SendError::Failed(e.to_string()))
    }

    /// Serenity re-sends the indicator every few seconds until the `Typing`
    /// handle is dropped, so long completions stay visibly in progress.
    fn start_typing(&self, channel_id: &str) -> Option<TypingGuard> {
        match parse_channel_id(channel_id) {
            Ok(channel) => Some(Box::new(channel.start_typing(&self.http))),
            Err(e) => {
                debug!(channel = %channel_id, error = %e, "no typing indicator");
                None
            }
        }
    }
}

/// Discord snowflakes are non-zero 64-bit integers.
pub fn parse_channel_id(raw: &str) -> Result<ChannelId, SendError> {
    raw.parse::<NonZeroU64>()
        .map(|id| ChannelId::new(id.get()))
        .map_err(|_| SendError::InvalidChannel(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snowflake() {
        let id = parse_channel_id("1099451204345020426").unwrap();
        assert_eq!(id.get(), 1_099_451_204_345_020_426);
    }

    #[test]
    fn rejects_non_snowflakes() {
        for raw in ["", "0", "general", "-5", "12ab"] {
            assert!(
                matches!(parse_channel_id(raw), Err(SendError::InvalidChannel(ref s)) if s == raw),
                "accepted {raw:?}"
            );
        }
    }
}
