//! Discord slash commands: `/forget` and `/help`.
//!
//! Registration happens in `ready()` when `discord.slash_commands` is true.
//! Interactions are dispatched from `interaction_create` in the event handler.
//! The same commands typed as plain text are handled by the relay itself.

use serenity::builder::{
    CreateCommand, CreateInteractionResponse, CreateInteractionResponseMessage,
    EditInteractionResponse,
};
use serenity::model::application::{Command, CommandInteraction};
use serenity::prelude::Context;
use tracing::{info, warn};

use parley_agent::pipeline::commands::HELP_TEXT;
use parley_agent::pipeline::Relay;

pub const UNKNOWN_COMMAND: &str = "Unknown command.";

/// Register global slash commands. Call from `ready()`.
pub async fn register_commands(ctx: &Context) {
    let commands = vec![
        CreateCommand::new("forget")
            .description("Clear the bot's conversation history for this channel"),
        CreateCommand::new("help").description("List the bot's commands"),
    ];

    match Command::set_global_commands(&ctx.http, commands).await {
        Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
        Err(e) => warn!(error = %e, "failed to register global slash commands"),
    }
}

/// Dispatch a slash command interaction.
///
/// `/forget` waits for the channel lock, which a turn holds for the whole
/// model call, so the interaction is deferred first and edited afterwards.
pub async fn handle_interaction(relay: &Relay, ctx: &Context, command: &CommandInteraction) {
    if let Err(e) = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(
                CreateInteractionResponseMessage::new().ephemeral(true),
            ),
        )
        .await
    {
        warn!(command = %command.data.name, error = %e, "failed to defer slash command");
        return;
    }

    let channel_id = command.channel_id.to_string();
    let response = command_reply(relay, &command.data.name, &channel_id).await;

    if let Err(e) = command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(response))
        .await
    {
        warn!(command = %command.data.name, error = %e, "slash command response failed");
    }
}

/// Run a slash command by name and return the text to show the invoker.
pub async fn command_reply(relay: &Relay, name: &str, channel_id: &str) -> String {
    match name {
        "forget" => relay.forget(channel_id).await,
        "help" => HELP_TEXT.to_string(),
        _ => UNKNOWN_COMMAND.to_string(),
    }
}
