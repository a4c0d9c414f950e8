//! Conversation relay core: model providers, per-channel context, reply
//! chunking and the upstream failure policy.

pub mod backend;
pub mod chunk;
pub mod classify;
pub mod context;
pub mod fence;
pub mod openai;
pub mod pipeline;
pub mod provider;

pub use backend::{build_backend, ChatBackend, EchoBackend, ModelBackend};
pub use chunk::{ChunkError, Chunker};
pub use classify::{classify, ClassifiedError, ErrorClass, Recovery};
pub use context::{ContextError, ContextStore, ConversationContext};
pub use provider::{LlmProvider, Message, ProviderError, Role};
