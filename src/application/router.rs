//! # Command Router
//!
//! First stop for every inbound gateway event. Ordinary messages are recorded
//! and classified for the orchestrator; slash commands are parsed into a
//! closed set of [`BotCommand`] variants, checked for permission and applied
//! to the registry or store. Rejections go back to the invoking user only.

use std::sync::Arc;
use tracing::debug;

use crate::application::logging::LogBroadcaster;
use crate::application::registry::ChannelRegistry;
use crate::application::store::MessageStore;
use crate::application::utils::preview;
use crate::domain::error::ConfigError;
use crate::domain::types::{CommandReply, ConfigPatch, InboundMessage, Message, OptionValue, SlashCommand};
use crate::strings::{logs, messages, prompts};

const MAX_PERSONA_CHARS: usize = 4000;
const MAX_MODEL_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Channel,
    Guild,
}

/// Every command the bot understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    ShowSettings,
    UpdateSettings(ConfigPatch),
    SetModel(String),
    SetPersona(String),
    ClearHistory(ClearScope),
}

impl BotCommand {
    pub fn parse(cmd: &SlashCommand) -> Result<Self, ConfigError> {
        match cmd.name.as_str() {
            "settings" => {
                let mut patch = ConfigPatch::default();
                for option in &cmd.options {
                    let value = expect_bool(&option.name, &option.value)?;
                    match option.name.as_str() {
                        "listen" => patch.is_listening = Some(value),
                        "shared" => patch.shared_chat = Some(value),
                        "listen_mode" => patch.listen_mode = Some(value),
                        other => return Err(unknown_option(other)),
                    }
                }
                Ok(if patch.is_empty() {
                    BotCommand::ShowSettings
                } else {
                    BotCommand::UpdateSettings(patch)
                })
            }
            "model" => {
                reject_extra(cmd, &["name"])?;
                let name = required_string(cmd, "name")?;
                if name.chars().count() > MAX_MODEL_CHARS {
                    return Err(ConfigError::Invalid(format!(
                        "model name must be at most {MAX_MODEL_CHARS} characters"
                    )));
                }
                Ok(BotCommand::SetModel(name))
            }
            "persona" => {
                reject_extra(cmd, &["prompt"])?;
                let prompt = required_string(cmd, "prompt")?;
                if prompt.chars().count() > MAX_PERSONA_CHARS {
                    return Err(ConfigError::Invalid(format!(
                        "personality must be at most {MAX_PERSONA_CHARS} characters"
                    )));
                }
                Ok(BotCommand::SetPersona(prompt))
            }
            "clear" => {
                reject_extra(cmd, &["scope"])?;
                let scope = match cmd.option("scope") {
                    None => ClearScope::Channel,
                    Some(OptionValue::String(s)) if s == "channel" => ClearScope::Channel,
                    Some(OptionValue::String(s)) if s == "guild" => ClearScope::Guild,
                    Some(_) => {
                        return Err(ConfigError::Invalid(
                            "scope must be `channel` or `guild`".to_string(),
                        ));
                    }
                };
                Ok(BotCommand::ClearHistory(scope))
            }
            other => Err(ConfigError::UnknownCommand(other.to_string())),
        }
    }
}

fn unknown_option(name: &str) -> ConfigError {
    ConfigError::Invalid(format!("unknown option `{name}`"))
}

fn expect_bool(name: &str, value: &OptionValue) -> Result<bool, ConfigError> {
    match value {
        OptionValue::Bool(b) => Ok(*b),
        _ => Err(ConfigError::Invalid(format!("option `{name}` must be true or false"))),
    }
}

fn reject_extra(cmd: &SlashCommand, allowed: &[&str]) -> Result<(), ConfigError> {
    match cmd.options.iter().find(|o| !allowed.contains(&o.name.as_str())) {
        Some(option) => Err(unknown_option(&option.name)),
        None => Ok(()),
    }
}

fn required_string(cmd: &SlashCommand, name: &str) -> Result<String, ConfigError> {
    match cmd.option(name) {
        Some(OptionValue::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(OptionValue::String(_)) => Err(ConfigError::Invalid(format!("`{name}` must not be empty"))),
        Some(_) => Err(ConfigError::Invalid(format!("`{name}` must be text"))),
        None => Err(ConfigError::Invalid(format!("missing required option `{name}`"))),
    }
}

/// What happened to an ordinary message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Not recorded (own message or conflicting channel binding).
    Ignored,
    /// Recorded, no reply wanted.
    Recorded,
    /// Recorded and the orchestrator should answer.
    Eligible,
}

pub struct CommandRouter {
    registry: Arc<ChannelRegistry>,
    store: Arc<MessageStore>,
    logs: Arc<LogBroadcaster>,
}

impl CommandRouter {
    pub fn new(registry: Arc<ChannelRegistry>, store: Arc<MessageStore>, logs: Arc<LogBroadcaster>) -> Self {
        Self { registry, store, logs }
    }

    /// Records an ordinary message and decides whether it deserves a reply.
    pub fn ingest(&self, message: &InboundMessage, bot_user_id: &str) -> Ingest {
        if message.author_id == bot_user_id {
            return Ingest::Ignored;
        }
        if let Err(e) = self.registry.ensure_channel(&message.guild_id, &message.channel_id) {
            self.logs.warn(logs::channel_mismatch(&e.to_string()));
            return Ingest::Ignored;
        }

        let content = prompts::with_attachments(&message.content, &message.attachments);
        debug!(
            "{}",
            logs::message_received(&message.author_name, &message.channel_id, &preview(&content, 80))
        );
        self.store
            .append(&message.channel_id, Message::user(&message.author_name, &content));

        if self.registry.is_eligible(&message.channel_id, message, bot_user_id) {
            Ingest::Eligible
        } else {
            Ingest::Recorded
        }
    }

    /// Validates and applies a slash command, returning the reply text.
    pub fn execute(&self, cmd: &SlashCommand) -> Result<String, ConfigError> {
        let guild_id = cmd.guild_id.as_deref().ok_or(ConfigError::MissingGuild)?;
        if !cmd.is_admin {
            return Err(ConfigError::Unauthorized);
        }
        let command = BotCommand::parse(cmd)?;
        let channel_id = cmd.channel_id.as_str();

        match command {
            BotCommand::ShowSettings => {
                let channel = self.registry.ensure_channel(guild_id, channel_id)?;
                Ok(messages::settings_summary(&channel, &self.registry.guild_config(guild_id)))
            }
            BotCommand::UpdateSettings(patch) => {
                let channel = self.registry.update_config(guild_id, channel_id, &patch)?;
                Ok(messages::settings_summary(&channel, &self.registry.guild_config(guild_id)))
            }
            BotCommand::SetModel(model) => {
                self.registry.ensure_channel(guild_id, channel_id)?;
                let config = self.registry.set_chat_model(guild_id, &model);
                Ok(messages::model_set(&config.chat_model))
            }
            BotCommand::SetPersona(prompt) => {
                self.registry.ensure_channel(guild_id, channel_id)?;
                self.registry.set_system_prompt(guild_id, &prompt);
                Ok(messages::PERSONA_SET.to_string())
            }
            BotCommand::ClearHistory(ClearScope::Channel) => {
                self.registry.ensure_channel(guild_id, channel_id)?;
                self.store.clear(channel_id);
                Ok(messages::CHANNEL_CLEARED.to_string())
            }
            BotCommand::ClearHistory(ClearScope::Guild) => {
                self.registry.ensure_channel(guild_id, channel_id)?;
                let channels = self.registry.channels_in_guild(guild_id);
                self.store.clear_guild(&channels);
                Ok(messages::guild_cleared(channels.len()))
            }
        }
    }

    /// Runs a command and sends the outcome back to the user who issued it.
    pub fn handle_command(&self, cmd: SlashCommand, reply: CommandReply) {
        self.logs.info(logs::command_received(&cmd.user_name, &cmd.name));
        let text = match self.execute(&cmd) {
            Ok(text) => text,
            Err(e) => {
                self.logs
                    .warn(logs::command_rejected(&cmd.user_name, &cmd.name, &e.to_string()));
                match e {
                    ConfigError::Unauthorized => messages::AUTH_DENIED.to_string(),
                    ConfigError::MissingGuild => messages::GUILD_ONLY.to_string(),
                    ConfigError::UnknownCommand(name) => messages::unknown_command(&name),
                    other => messages::invalid_input(&other.to_string()),
                }
            }
        };
        reply.send(text);
    }
}
