//! Deciding whether an event is meant for the bot, and cleaning up its text.

use std::sync::LazyLock;

use regex::Regex;

use super::event::{ChannelKind, InboundEvent};

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?\d+>").expect("mention pattern is valid"));

/// An event is for the bot when it mentions the bot, replies to one of the
/// bot's messages, or arrives in a direct-message channel.
pub fn is_addressed_to_bot(event: &InboundEvent, bot_id: &str) -> bool {
    if event.mentions.iter().any(|id| id == bot_id) {
        return true;
    }

    if event.reply_to.is_some() && event.reply_to_author.as_deref() == Some(bot_id) {
        return true;
    }

    event.channel_kind == ChannelKind::DirectMessage
}

/// Remove user mention markup (`<@123>`, `<@!123>`) and trim the result.
pub fn strip_mentions(text: &str) -> String {
    MENTION.replace_all(text, "").trim().to_string()
}
