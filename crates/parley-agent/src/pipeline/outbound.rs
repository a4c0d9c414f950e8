use std::any::Any;

use async_trait::async_trait;

/// Keeps a typing indicator alive until dropped.
pub type TypingGuard = Box<dyn Any + Send>;

/// Errors from delivering a message to the platform.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The channel identifier is not valid for this platform.
    #[error("invalid channel id: {0}")]
    InvalidChannel(String),

    /// The platform refused or failed the send.
    #[error("send failed: {0}")]
    Failed(String),
}

/// Sending side of a gateway adapter.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Post one message to a channel.
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError>;

    /// Start a typing indicator that lasts until the returned guard is dropped.
    /// Default: the platform has none.
    fn start_typing(&self, _channel_id: &str) -> Option<TypingGuard> {
        None
    }
}
