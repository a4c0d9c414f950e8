use parley_agent::ClassifiedError;

/// Errors produced by the Discord adapter.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("no bot token configured (set discord.bot_token or DISCORD_BOT_TOKEN)")]
    NoToken,

    /// The model service rejected us in a way retrying cannot fix.
    #[error("upstream failure: {0}")]
    Upstream(#[from] ClassifiedError),
}
