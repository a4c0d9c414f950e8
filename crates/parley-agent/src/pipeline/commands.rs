//! Text commands intercepted before a message reaches the model.
//!
//! `/forget` clears the current channel's conversation, `/help` lists
//! commands. The Discord adapter exposes `/forget` as a slash command too;
//! both paths end in [`Relay::forget`].

use super::process::Relay;

pub const HELP_TEXT: &str = "**Commands**\n\
     - `/forget`: clear this channel's conversation history\n\
     - `/help`: show this help";

/// Returns `Some(response)` if `message` was a recognized command, `None` if
/// it should go to the model.
pub async fn handle_text_command(message: &str, relay: &Relay, channel_id: &str) -> Option<String> {
    let trimmed = message.trim();

    if trimmed.eq_ignore_ascii_case("/forget") {
        return Some(relay.forget(channel_id).await);
    }

    if trimmed.eq_ignore_ascii_case("/help") {
        return Some(HELP_TEXT.to_string());
    }

    None
}
