/// Kind of channel an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Guild,
    DirectMessage,
}

/// A new chat message, as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel_id: String,
    pub author_id: String,
    /// Message text with mention markup still in place.
    pub raw_text: String,
    /// User IDs mentioned in the message.
    pub mentions: Vec<String>,
    pub channel_kind: ChannelKind,
    /// ID of the message this one replies to, if any.
    pub reply_to: Option<String>,
    /// Author of the replied-to message, when the platform supplied it.
    pub reply_to_author: Option<String>,
}

impl InboundEvent {
    /// Convenience constructor for a guild message without mentions or reply.
    pub fn guild(channel_id: &str, author_id: &str, raw_text: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
            raw_text: raw_text.to_string(),
            mentions: Vec::new(),
            channel_kind: ChannelKind::Guild,
            reply_to: None,
            reply_to_author: None,
        }
    }

    /// Convenience constructor for a direct message.
    pub fn direct(channel_id: &str, author_id: &str, raw_text: &str) -> Self {
        Self {
            channel_kind: ChannelKind::DirectMessage,
            ..Self::guild(channel_id, author_id, raw_text)
        }
    }

    pub fn with_mention(mut self, user_id: &str) -> Self {
        self.mentions.push(user_id.to_string());
        self
    }

    pub fn replying_to(mut self, message_id: &str, author_id: Option<&str>) -> Self {
        self.reply_to = Some(message_id.to_string());
        self.reply_to_author = author_id.map(str::to_string);
        self
    }
}
