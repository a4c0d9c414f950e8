//! One conversational turn, start to finish.
//!
//! `Relay::handle_event` filters and cleans the inbound event, then
//! `run_turn` does the locked part: append the user message, ask the backend,
//! chunk and send the reply, append it. Failures go through the classifier
//! and only `InvalidCredentials` escapes as an error.

use tracing::{debug, error, info, warn};

use parley_core::config::ParleyConfig;

use crate::backend::ChatBackend;
use crate::chunk::Chunker;
use crate::classify::{classify, ClassifiedError, ErrorClass, Recovery};
use crate::context::{ContextError, ContextStore};
use crate::provider::Role;

use super::address::{is_addressed_to_bot, strip_mentions};
use super::commands::handle_text_command;
use super::event::InboundEvent;
use super::outbound::Outbound;

pub const REPLY_TOO_LONG_NOTICE: &str =
    "\u{26a0}\u{fe0f} The reply contained a line too long to post here.";
pub const FORGET_CONFIRMATION: &str = "Cleared the conversation history for this channel.";
pub const FORGET_NOTHING: &str = "There is no conversation history to clear in this channel.";

/// How a handled event ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Not for the bot (own message, not addressed, or empty after cleanup).
    Ignored,
    /// A text command was answered without calling the model.
    Command,
    /// The model answered; `chunks` messages were posted.
    Replied { chunks: usize },
    /// The model call failed and the failure was handled locally.
    Recovered { class: ErrorClass },
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The relay cannot make progress; the owning process decides what to do.
    #[error("fatal upstream failure: {0}")]
    Fatal(ClassifiedError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// The delivery pipeline: backend, per-channel contexts and chunking policy.
pub struct Relay {
    backend: Box<dyn ChatBackend>,
    contexts: ContextStore,
    model: String,
    chunker: Chunker,
}

impl Relay {
    pub fn new(
        backend: Box<dyn ChatBackend>,
        contexts: ContextStore,
        model: String,
        chunker: Chunker,
    ) -> Self {
        Self {
            backend,
            contexts,
            model,
            chunker,
        }
    }

    /// Build a relay from the loaded config. Discord settings fall back to defaults.
    pub fn from_config(config: &ParleyConfig, backend: Box<dyn ChatBackend>) -> Self {
        let discord = config.discord.clone().unwrap_or_default();
        Self::new(
            backend,
            ContextStore::new(&config.agent.system_prompt),
            config.agent.model.clone(),
            Chunker::new(discord.max_message_len, discord.overflow),
        )
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Entry point for every inbound message.
    pub async fn handle_event<O: Outbound + ?Sized>(
        &self,
        event: &InboundEvent,
        bot_id: &str,
        out: &O,
    ) -> Result<TurnOutcome, TurnError> {
        if event.author_id == bot_id {
            return Ok(TurnOutcome::Ignored);
        }

        if !is_addressed_to_bot(event, bot_id) {
            debug!(channel = %event.channel_id, "ignoring message not addressed to bot");
            return Ok(TurnOutcome::Ignored);
        }

        let prompt = strip_mentions(&event.raw_text);

        if let Some(response) = handle_text_command(&prompt, self, &event.channel_id).await {
            send_or_warn(out, &event.channel_id, &response).await;
            return Ok(TurnOutcome::Command);
        }

        if prompt.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }

        self.run_turn(&event.channel_id, &prompt, out).await
    }

    /// Run one turn for `channel_id` with the lock held throughout, so turns on
    /// the same channel never interleave.
    pub async fn run_turn<O: Outbound + ?Sized>(
        &self,
        channel_id: &str,
        prompt: &str,
        out: &O,
    ) -> Result<TurnOutcome, TurnError> {
        let mut guard = self.contexts.lock(channel_id).await;
        guard.get_or_create(&self.model);
        guard.append(Role::User, prompt)?;

        let typing = out.start_typing(channel_id);
        let result = match guard.context() {
            Some(ctx) => self.backend.reply(ctx).await,
            None => {
                return Err(ContextError::NotFound {
                    channel_id: channel_id.to_string(),
                }
                .into())
            }
        };
        drop(typing);

        match result {
            Ok(reply) => {
                let chunks = self.deliver(channel_id, &reply, out).await;
                guard.append(Role::Assistant, &reply)?;
                info!(channel = %channel_id, chunks, turns = guard.context().map(|c| c.turns()).unwrap_or(0), "reply delivered");
                Ok(TurnOutcome::Replied { chunks })
            }
            Err(e) => {
                let classified = classify(&e);
                match classified.recovery() {
                    Recovery::ResetAndNotify { notice } => {
                        warn!(channel = %channel_id, error = %classified, "context too long, resetting conversation");
                        guard.reset(&self.model);
                        self.backend.reset_context(channel_id).await;
                        self.notify(out, channel_id, &notice).await;
                    }
                    Recovery::Notify { notice } => {
                        // No retry for rate limits or server errors; the user can resend.
                        warn!(channel = %channel_id, class = %classified.class, error = %classified, "completion failed");
                        self.notify(out, channel_id, &notice).await;
                    }
                    Recovery::Fatal => {
                        error!(channel = %channel_id, error = %classified, "invalid credentials for model service");
                        return Err(TurnError::Fatal(classified));
                    }
                }
                Ok(TurnOutcome::Recovered {
                    class: classified.class,
                })
            }
        }
    }

    /// Remove the channel's conversation and return the confirmation text.
    pub async fn forget(&self, channel_id: &str) -> String {
        let removed = self.contexts.delete(channel_id).await;
        self.backend.reset_context(channel_id).await;
        info!(channel = %channel_id, removed, "conversation forgotten");
        if removed {
            FORGET_CONFIRMATION.to_string()
        } else {
            FORGET_NOTHING.to_string()
        }
    }

    /// Chunk and post a reply. Returns the number of messages sent.
    async fn deliver<O: Outbound + ?Sized>(&self, channel_id: &str, reply: &str, out: &O) -> usize {
        if reply.trim().is_empty() {
            warn!(channel = %channel_id, "model returned an empty reply, nothing to send");
            return 0;
        }

        let chunks = match self.chunker.split(reply) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "reply could not be chunked");
                self.notify(out, channel_id, REPLY_TOO_LONG_NOTICE).await;
                return 0;
            }
        };

        let mut sent = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            match out.send(channel_id, chunk).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(channel = %channel_id, chunk_index = i, error = %e, "failed to send reply chunk");
                }
            }
        }
        sent
    }

    /// Post a single notice, cut down to one message if the upstream text is long.
    async fn notify<O: Outbound + ?Sized>(&self, out: &O, channel_id: &str, notice: &str) {
        let notice = truncate_chars(notice, self.chunker.max_len());
        send_or_warn(out, channel_id, &notice).await;
    }
}

/// Shorten `text` to at most `max` characters, marking the cut with an ellipsis.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('\u{2026}');
    cut
}

async fn send_or_warn<O: Outbound + ?Sized>(out: &O, channel_id: &str, text: &str) {
    if let Err(e) = out.send(channel_id, text).await {
        warn!(channel = %channel_id, error = %e, "failed to send message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use parley_core::config::OverflowPolicy;

    use crate::context::ConversationContext;
    use crate::pipeline::outbound::{SendError, TypingGuard};
    use crate::provider::ProviderError;

    const BOT: &str = "999";

    /// Backend that replays a fixed script of results.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn reply(&self, _ctx: &ConversationContext) -> Result<String, ProviderError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default".to_string()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Recorder {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl Outbound for Recorder {
        async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn relay(replies: Vec<Result<String, ProviderError>>, max_len: usize) -> Relay {
        Relay::new(
            Box::new(Scripted::new(replies)),
            ContextStore::new("you are a helpful chatbot"),
            "gpt-4".to_string(),
            Chunker::new(max_len, OverflowPolicy::Split),
        )
    }

    fn api(status: u16, message: &str) -> ProviderError {
        ProviderError::Api {
            status,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn mentioned_message_gets_reply() {
        let relay = relay(vec![Ok("Test reply".to_string())], 2000);
        let out = Recorder::default();
        let event = InboundEvent::guild("chan", "user", "Hello <@999>, how are you?").with_mention(BOT);

        let outcome = relay.handle_event(&event, BOT, &out).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Replied { chunks: 1 });
        assert_eq!(out.texts(), vec!["Test reply\n"]);

        let ctx = relay.contexts().snapshot("chan").await.unwrap();
        assert_eq!(ctx.messages()[1].content, "Hello , how are you?");
        assert_eq!(ctx.messages()[2].content, "Test reply");
    }

    #[tokio::test]
    async fn own_and_unaddressed_messages_are_ignored() {
        let relay = relay(vec![], 2000);
        let out = Recorder::default();

        let own = InboundEvent::direct("dm", BOT, "echo");
        assert_eq!(relay.handle_event(&own, BOT, &out).await.unwrap(), TurnOutcome::Ignored);

        let chatter = InboundEvent::guild("chan", "user", "just talking");
        assert_eq!(relay.handle_event(&chatter, BOT, &out).await.unwrap(), TurnOutcome::Ignored);

        let bare = InboundEvent::guild("chan", "user", "<@999>").with_mention(BOT);
        assert_eq!(relay.handle_event(&bare, BOT, &out).await.unwrap(), TurnOutcome::Ignored);

        assert!(out.texts().is_empty());
        assert!(relay.contexts().snapshot("chan").await.is_none());
    }

    #[tokio::test]
    async fn long_reply_is_sent_in_order() {
        let reply = "aaaaaaaaa\nbbbbbbbbb\nccccccccc".to_string();

        let roomy = relay(vec![Ok(reply.clone())], 40);
        let out = Recorder::default();
        let outcome = roomy.run_turn("chan", "go", &out).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Replied { chunks: 1 });

        let tight = relay(vec![Ok(reply)], 20);
        let out = Recorder::default();
        let outcome = tight.run_turn("chan", "go", &out).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Replied { chunks: 2 });
        assert_eq!(out.texts(), vec!["aaaaaaaaa\nbbbbbbbbb\n", "ccccccccc\n"]);
    }

    #[tokio::test]
    async fn context_too_long_resets_and_notifies_once() {
        let relay = relay(
            vec![
                Ok("first answer".to_string()),
                Err(api(400, "Please reduce the length of the messages.")),
            ],
            2000,
        );
        let out = Recorder::default();
        relay.run_turn("chan", "first", &out).await.unwrap();

        let outcome = relay.run_turn("chan", "second", &out).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Recovered {
                class: ErrorClass::ContextTooLong
            }
        );
        assert_eq!(
            out.texts(),
            vec![
                "first answer\n".to_string(),
                crate::classify::CONTEXT_RESET_NOTICE.to_string()
            ]
        );
        let ctx = relay.contexts().snapshot("chan").await.unwrap();
        assert_eq!(ctx.turns(), 0);
    }

    #[tokio::test]
    async fn rate_limit_sends_upstream_message_and_keeps_context() {
        let relay = relay(vec![Err(api(429, "Rate limit reached"))], 2000);
        let out = Recorder::default();

        let outcome = relay.run_turn("chan", "hi", &out).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Recovered {
                class: ErrorClass::RateLimited
            }
        );
        assert_eq!(out.texts(), vec!["Rate limit reached"]);
        let ctx = relay.contexts().snapshot("chan").await.unwrap();
        assert_eq!(ctx.last_user_message(), Some("hi"));
        assert_eq!(ctx.turns(), 1);
    }

    #[tokio::test]
    async fn invalid_credentials_surface_as_fatal() {
        let relay = relay(vec![Err(api(401, "Incorrect API key provided"))], 2000);
        let out = Recorder::default();

        let err = relay.run_turn("chan", "hi", &out).await.unwrap_err();
        match err {
            TurnError::Fatal(c) => assert_eq!(c.class, ErrorClass::InvalidCredentials),
            other => panic!("expected fatal, got {other:?}"),
        }
        assert!(out.texts().is_empty());
    }

    #[tokio::test]
    async fn forget_command_clears_channel() {
        let relay = relay(vec![Ok("hello".to_string())], 2000);
        let out = Recorder::default();
        relay.run_turn("dm", "hi", &out).await.unwrap();

        let forget = InboundEvent::direct("dm", "user", "/forget");
        let outcome = relay.handle_event(&forget, BOT, &out).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Command);
        assert_eq!(out.texts().last().unwrap(), FORGET_CONFIRMATION);
        assert!(relay.contexts().snapshot("dm").await.is_none());

        relay.handle_event(&forget, BOT, &out).await.unwrap();
        assert_eq!(out.texts().last().unwrap(), FORGET_NOTHING);
    }

    #[tokio::test]
    async fn empty_reply_sends_nothing_but_is_recorded() {
        let relay = relay(vec![Ok("   ".to_string())], 2000);
        let out = Recorder::default();
        let outcome = relay.run_turn("chan", "hi", &out).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Replied { chunks: 0 });
        assert!(out.texts().is_empty());
        assert_eq!(relay.contexts().snapshot("chan").await.unwrap().turns(), 2);
    }

    #[tokio::test]
    async fn rejected_overflow_sends_single_notice() {
        let relay = Relay::new(
            Box::new(Scripted::new(vec![Ok("x".repeat(100))])),
            ContextStore::new("sys"),
            "gpt-4".to_string(),
            Chunker::new(60, OverflowPolicy::Reject),
        );
        let out = Recorder::default();
        let outcome = relay.run_turn("chan", "hi", &out).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Replied { chunks: 0 });
        assert_eq!(out.texts(), vec![REPLY_TOO_LONG_NOTICE]);
    }

    #[tokio::test]
    async fn long_upstream_notice_fits_one_message() {
        let body = "Rate limit reached. ".repeat(20);
        let relay = relay(vec![Err(api(429, &body))], 64);
        let out = Recorder::default();

        relay.run_turn("chan", "hi", &out).await.unwrap();
        let texts = out.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].chars().count(), 64);
        assert!(texts[0].starts_with("Rate limit reached."));
        assert!(texts[0].ends_with('\u{2026}'));
    }

    #[test]
    fn truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_chars("äöüäöü", 4), "äöü\u{2026}");
    }

    /// Backend that records whether the typing indicator was up while it ran.
    struct SeesTyping {
        active: Arc<AtomicBool>,
        seen: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ChatBackend for SeesTyping {
        fn name(&self) -> &str {
            "sees-typing"
        }
        async fn reply(&self, _ctx: &ConversationContext) -> Result<String, ProviderError> {
            self.seen
                .store(self.active.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok("done".to_string())
        }
    }

    struct TypingOutbound {
        active: Arc<AtomicBool>,
    }

    struct ClearOnDrop(Arc<AtomicBool>);

    impl Drop for ClearOnDrop {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Outbound for TypingOutbound {
        async fn send(&self, _channel_id: &str, _text: &str) -> Result<(), SendError> {
            Ok(())
        }

        fn start_typing(&self, _channel_id: &str) -> Option<TypingGuard> {
            self.active.store(true, Ordering::SeqCst);
            Some(Box::new(ClearOnDrop(Arc::clone(&self.active))))
        }
    }

    #[tokio::test]
    async fn typing_indicator_spans_the_model_call() {
        let active = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(AtomicBool::new(false));
        let relay = Relay::new(
            Box::new(SeesTyping {
                active: Arc::clone(&active),
                seen: Arc::clone(&seen),
            }),
            ContextStore::new("sys"),
            "gpt-4".to_string(),
            Chunker::new(2000, OverflowPolicy::Split),
        );
        let out = TypingOutbound {
            active: Arc::clone(&active),
        };

        relay.run_turn("chan", "hi", &out).await.unwrap();
        assert!(seen.load(Ordering::SeqCst));
        assert!(!active.load(Ordering::SeqCst));
    }
}
