//! Message-delivery pipeline, shared by every gateway adapter.
//!
//! An adapter translates its platform's message into an [`InboundEvent`],
//! implements [`Outbound`] for sending, and hands both to
//! [`Relay::handle_event`]. Addressing, commands, context bookkeeping,
//! chunking and failure recovery all happen here.

pub mod address;
pub mod commands;
pub mod event;
pub mod outbound;
pub mod process;

pub use address::{is_addressed_to_bot, strip_mentions};
pub use event::{ChannelKind, InboundEvent};
pub use outbound::{Outbound, SendError, TypingGuard};
pub use process::{Relay, TurnError, TurnOutcome};
