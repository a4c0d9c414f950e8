use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

/// Discord rejects messages longer than this many characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;
/// Smallest outbound limit that still leaves room for a reopened fence plus content.
pub const MIN_MESSAGE_LEN: usize = 32;
pub const DEFAULT_SYSTEM_PROMPT: &str = "you are a helpful chatbot";

/// Top-level config (parley.toml + PARLEY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Which reply backend answers inbound messages.
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// Fixed preamble seeded as the first (system) message of every conversation.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Completion token cap. Omitted from requests when unset.
    pub max_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Completions from the OpenAI chat API.
    #[default]
    OpenAi,
    /// Offline backend that repeats the latest user message. No credentials needed.
    Echo,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Platform limit for a single outbound message, counted in characters.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    /// When true, direct messages (DMs) are accepted.
    /// Defaults to true.
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
    /// Register and answer the `/forget` slash command.
    #[serde(default = "bool_true")]
    pub slash_commands: bool,
    /// What the chunker does with a single line longer than `max_message_len`.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Optional "Playing ..." presence text.
    pub activity_name: Option<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            dm_allowed: true,
            slash_commands: true,
            overflow: OverflowPolicy::default(),
            activity_name: None,
        }
    }
}

/// Handling of a single line that cannot fit in one outbound message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Break the line on character boundaries so every chunk stays within the limit.
    #[default]
    Split,
    /// Refuse to chunk the text at all.
    Reject,
}

fn bool_true() -> bool {
    true
}
fn default_model() -> String {
    "gpt-4-turbo".to_string()
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_max_message_len() -> usize {
    DEFAULT_MAX_MESSAGE_LEN
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

impl ParleyConfig {
    /// Load config from a TOML file with env var overrides.
    ///
    /// Later sources win:
    ///   1. The TOML file (explicit path, else ~/.parley/parley.toml; a missing file is fine)
    ///   2. `OPENAI_API_KEY` / `DISCORD_BOT_TOKEN`
    ///   3. `PARLEY_*` with `__` as the nesting separator (e.g. `PARLEY_AGENT__MODEL`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ParleyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(
                Env::raw()
                    .only(&["OPENAI_API_KEY"])
                    .map(|_| "providers.openai.api_key".into()),
            )
            .merge(
                Env::raw()
                    .only(&["DISCORD_BOT_TOKEN"])
                    .map(|_| "discord.bot_token".into()),
            )
            .merge(Env::prefixed("PARLEY_").split("__"))
            .extract()
            .map_err(|e| ParleyError::Config(e.to_string()))?;

        tracing::debug!(path = %path, backend = ?config.agent.backend, "config loaded");
        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.model.trim().is_empty() {
            return Err(ParleyError::Config("agent.model must not be empty".into()));
        }

        if self.agent.backend == BackendKind::OpenAi {
            let has_key = self
                .providers
                .openai
                .as_ref()
                .is_some_and(|p| !p.api_key.trim().is_empty());
            if !has_key {
                return Err(ParleyError::Config(
                    "OPENAI_API_KEY not found in .env file or environment variable".into(),
                ));
            }
        }

        if let Some(discord) = &self.discord {
            if discord.max_message_len < MIN_MESSAGE_LEN {
                return Err(ParleyError::Config(format!(
                    "discord.max_message_len must be at least {MIN_MESSAGE_LEN} (got {})",
                    discord.max_message_len
                )));
            }
        }

        Ok(())
    }
}

fn default_config_path() -> String {
    if let Ok(path) = std::env::var("PARLEY_CONFIG") {
        return path;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parley/parley.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_any_source() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let config = ParleyConfig::load(Some("missing.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.agent.backend, BackendKind::OpenAi);
            assert_eq!(config.agent.model, "gpt-4-turbo");
            assert_eq!(config.agent.system_prompt, DEFAULT_SYSTEM_PROMPT);
            assert!(config.discord.is_none());
            Ok(())
        });
    }

    #[test]
    fn toml_file_and_discord_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "parley.toml",
                r#"
                [agent]
                backend = "echo"
                model = "gpt-4o"

                [discord]
                bot_token = "abc"
                "#,
            )?;
            let config = ParleyConfig::load(Some("parley.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.agent.backend, BackendKind::Echo);
            assert_eq!(config.agent.model, "gpt-4o");
            let discord = config.discord.expect("discord section");
            assert_eq!(discord.bot_token, "abc");
            assert_eq!(discord.max_message_len, DEFAULT_MAX_MESSAGE_LEN);
            assert!(discord.dm_allowed);
            assert_eq!(discord.overflow, OverflowPolicy::Split);
            Ok(())
        });
    }

    #[test]
    fn credential_env_vars_fill_sections() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("OPENAI_API_KEY", "sk-test");
            jail.set_env("DISCORD_BOT_TOKEN", "bot-token");
            let config = ParleyConfig::load(Some("missing.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            let openai = config.providers.openai.as_ref().expect("openai section");
            assert_eq!(openai.api_key, "sk-test");
            assert_eq!(openai.base_url, "https://api.openai.com");
            assert_eq!(config.discord.expect("discord section").bot_token, "bot-token");
            Ok(())
        });
    }

    #[test]
    fn prefixed_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("parley.toml", "[agent]\nmodel = \"gpt-4\"\n")?;
            jail.set_env("PARLEY_AGENT__MODEL", "gpt-4o-mini");
            jail.set_env("PARLEY_DISCORD__MAX_MESSAGE_LEN", "1500");
            let config = ParleyConfig::load(Some("parley.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.agent.model, "gpt-4o-mini");
            assert_eq!(config.discord.expect("discord section").max_message_len, 1500);
            Ok(())
        });
    }

    #[test]
    fn validate_requires_openai_key() {
        let config = ParleyConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let mut echo = ParleyConfig::default();
        echo.agent.backend = BackendKind::Echo;
        assert!(echo.validate().is_ok());
    }

    #[test]
    fn validate_rejects_tiny_message_limit() {
        let mut config = ParleyConfig::default();
        config.agent.backend = BackendKind::Echo;
        config.discord = Some(DiscordConfig {
            max_message_len: 8,
            ..DiscordConfig::default()
        });
        assert!(config.validate().is_err());
    }
}
