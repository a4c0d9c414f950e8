//! Reply backends.
//!
//! A backend turns a channel's conversation into the next assistant message.
//! The concrete backend is picked once at startup from `agent.backend`.

use async_trait::async_trait;
use tracing::{debug, info};

use parley_core::config::{AgentConfig, BackendKind, ProvidersConfig};
use parley_core::error::ParleyError;

use crate::context::ConversationContext;
use crate::openai::OpenAiProvider;
use crate::provider::{ChatRequest, LlmProvider, ProviderError};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// One-time setup before the first reply. Default: nothing to do.
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Produce the assistant reply for the full conversation so far.
    async fn reply(&self, context: &ConversationContext) -> Result<String, ProviderError>;

    /// Drop any backend-side state held for a channel whose context was reset.
    /// Default: the backend is stateless.
    async fn reset_context(&self, _channel_id: &str) {}
}

/// Backend that forwards the conversation to a chat-completion provider.
pub struct ModelBackend {
    provider: Box<dyn LlmProvider>,
    max_tokens: Option<u32>,
}

impl ModelBackend {
    pub fn new(provider: Box<dyn LlmProvider>, max_tokens: Option<u32>) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }
}

#[async_trait]
impl ChatBackend for ModelBackend {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn reply(&self, context: &ConversationContext) -> Result<String, ProviderError> {
        let req = ChatRequest {
            model: context.model.clone(),
            messages: context.messages().to_vec(),
            max_tokens: self.max_tokens,
        };
        info!(
            model = %req.model,
            provider = %self.provider.name(),
            messages = req.messages.len(),
            "processing chat request"
        );

        let resp = self.provider.send(&req).await?;
        debug!(
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            stop_reason = %resp.stop_reason,
            reply = %resp.content,
            "chat completion received"
        );
        Ok(resp.content)
    }
}

/// Offline backend: answers with the latest user message.
#[derive(Debug, Default)]
pub struct EchoBackend;

#[async_trait]
impl ChatBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn reply(&self, context: &ConversationContext) -> Result<String, ProviderError> {
        context
            .last_user_message()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Unavailable("no user message to echo".to_string()))
    }
}

/// Construct the backend selected in config.
pub fn build_backend(
    agent: &AgentConfig,
    providers: &ProvidersConfig,
) -> Result<Box<dyn ChatBackend>, ParleyError> {
    match agent.backend {
        BackendKind::OpenAi => {
            let openai = providers.openai.as_ref().ok_or_else(|| {
                ParleyError::Config("backend \"openai\" needs [providers.openai]".to_string())
            })?;
            info!(base_url = %openai.base_url, model = %agent.model, "using OpenAI backend");
            let provider = OpenAiProvider::new(openai.api_key.clone(), Some(openai.base_url.clone()));
            Ok(Box::new(ModelBackend::new(
                Box::new(provider),
                agent.max_tokens,
            )))
        }
        BackendKind::Echo => {
            info!("using echo backend");
            Ok(Box::new(EchoBackend))
        }
    }
}
