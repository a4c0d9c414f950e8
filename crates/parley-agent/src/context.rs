//! Per-channel conversation history.
//!
//! Every channel gets its own async mutex so a whole turn (append user
//! message, read history, call the model, append reply) can run as one
//! critical section without blocking other channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use crate::provider::{Message, Role};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContextError {
    /// `append` was called before the channel's context was created.
    #[error("no conversation context for channel {channel_id}")]
    NotFound { channel_id: String },
}

/// Ordered message history for one channel.
///
/// The first message is always the system preamble; it is only replaced by
/// reseeding the whole context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub channel_id: String,
    pub model: String,
    messages: Vec<Message>,
}

impl ConversationContext {
    pub fn new(channel_id: &str, model: &str, preamble: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            model: model.to_string(),
            messages: vec![Message::system(preamble)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of completed and pending turns after the preamble.
    pub fn turns(&self) -> usize {
        self.messages.len() - 1
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    fn push(&mut self, role: Role, content: &str) {
        self.messages.push(Message {
            role,
            content: content.to_string(),
        });
    }
}

type Slot = Arc<Mutex<Option<ConversationContext>>>;

/// Keyed store of conversation contexts with one lock per channel.
pub struct ContextStore {
    preamble: Arc<str>,
    slots: DashMap<String, Slot>,
}

impl ContextStore {
    pub fn new(preamble: &str) -> Self {
        Self {
            preamble: Arc::from(preamble),
            slots: DashMap::new(),
        }
    }

    /// Acquire exclusive access to one channel's context for the duration of a turn.
    ///
    /// Waits while another task holds the same channel; other channels are unaffected.
    pub async fn lock(&self, channel_id: &str) -> ChannelGuard {
        // Clone the slot out before awaiting so the map shard is not held across the wait.
        let slot = self.slots.entry(channel_id.to_string()).or_default().clone();
        ChannelGuard {
            channel_id: channel_id.to_string(),
            preamble: Arc::clone(&self.preamble),
            guard: slot.lock_owned().await,
        }
    }

    /// Return the channel's context, creating it seeded with the preamble if absent.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, channel_id: &str, model: &str) -> ConversationContext {
        self.lock(channel_id).await.get_or_create(model).clone()
    }

    #[instrument(skip(self, content), fields(len = content.len()))]
    pub async fn append(
        &self,
        channel_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), ContextError> {
        self.lock(channel_id).await.append(role, content)
    }

    /// Replace the channel's context with a freshly seeded one.
    #[instrument(skip(self))]
    pub async fn reset(&self, channel_id: &str, model: &str) {
        self.lock(channel_id).await.reset(model);
    }

    /// Remove the channel's context. Succeeds whether or not it existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, channel_id: &str) -> bool {
        let removed = self.lock(channel_id).await.delete();
        // Drop the slot itself once nobody else is waiting on it.
        self.slots.remove_if(channel_id, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|ctx| ctx.is_none())
        });
        removed
    }

    /// Copy of the channel's context, if one exists.
    pub async fn snapshot(&self, channel_id: &str) -> Option<ConversationContext> {
        if !self.slots.contains_key(channel_id) {
            return None;
        }
        self.lock(channel_id).await.context().cloned()
    }

    /// Number of channel entries currently tracked (live or being waited on).
    pub fn tracked_channels(&self) -> usize {
        self.slots.len()
    }
}

/// Exclusive handle on one channel's context. Released on drop.
pub struct ChannelGuard {
    channel_id: String,
    preamble: Arc<str>,
    guard: OwnedMutexGuard<Option<ConversationContext>>,
}

impl ChannelGuard {
    pub fn context(&self) -> Option<&ConversationContext> {
        self.guard.as_ref()
    }

    pub fn get_or_create(&mut self, model: &str) -> &ConversationContext {
        if self.guard.is_none() {
            debug!(channel = %self.channel_id, model, "creating conversation context");
        }
        let channel_id = &self.channel_id;
        let preamble = &self.preamble;
        self.guard
            .get_or_insert_with(|| ConversationContext::new(channel_id, model, preamble))
    }

    pub fn append(&mut self, role: Role, content: &str) -> Result<(), ContextError> {
        match self.guard.as_mut() {
            Some(ctx) => {
                ctx.push(role, content);
                Ok(())
            }
            None => Err(ContextError::NotFound {
                channel_id: self.channel_id.clone(),
            }),
        }
    }

    pub fn reset(&mut self, model: &str) {
        debug!(channel = %self.channel_id, model, "reseeding conversation context");
        *self.guard = Some(ConversationContext::new(
            &self.channel_id,
            model,
            &self.preamble,
        ));
    }

    /// Returns whether a context was present.
    pub fn delete(&mut self) -> bool {
        self.guard.take().is_some()
    }
}
