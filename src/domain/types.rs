//! # Domain Types
//!
//! Common data structures shared by the engine components: stored messages,
//! operator log entries, channel configuration and the events a gateway emits.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

pub type GuildId = String;
pub type ChannelId = String;

/// Who produced a stored turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A conversation turn as stored in a channel's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub author_name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(author_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            author_name: Some(author_name.into()),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            author_name: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

/// One line of the operator-facing log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            level,
            message: message.into(),
        }
    }
}

/// Coarse status shown to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStatus {
    pub running: bool,
    pub enabled: bool,
}

/// Per-channel switches, changed through `/settings`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub is_listening: bool,
    pub shared_chat: bool,
    pub listen_mode: bool,
}

/// Partial update of a [`ChannelConfig`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub is_listening: Option<bool>,
    pub shared_chat: Option<bool>,
    pub listen_mode: Option<bool>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.is_listening.is_none() && self.shared_chat.is_none() && self.listen_mode.is_none()
    }

    pub fn apply(&self, config: &mut ChannelConfig) {
        if let Some(v) = self.is_listening {
            config.is_listening = v;
        }
        if let Some(v) = self.shared_chat {
            config.shared_chat = v;
        }
        if let Some(v) = self.listen_mode {
            config.listen_mode = v;
        }
    }
}

/// Model and persona a guild answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub chat_model: String,
    pub system_prompt: String,
}

/// A text message observed on the gateway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    /// Text files attached to the message, already downloaded.
    pub attachments: Vec<TextAttachment>,
    /// The message this one answers, if it is a reply.
    pub reply_to: Option<QuotedMessage>,
    /// Users, roles and channels mentioned, resolved to display names.
    pub mentions: Vec<Mention>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextAttachment {
    pub filename: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedMessage {
    pub author_name: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionKind {
    User,
    Role,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub kind: MentionKind,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    String(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}

/// A slash-command invocation as delivered by the platform, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SlashCommand {
    pub name: String,
    pub options: Vec<CommandOption>,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub user_name: String,
    /// Whether the invoking member holds the platform's administrator permission.
    pub is_admin: bool,
}

impl SlashCommand {
    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.value)
    }
}

/// Return path for the text shown to the user who invoked a command.
#[derive(Debug)]
pub struct CommandReply(oneshot::Sender<String>);

impl CommandReply {
    pub fn channel() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Delivers `text`. A gateway that stopped waiting is not an error.
    pub fn send(self, text: impl Into<String>) {
        let _ = self.0.send(text.into());
    }
}

/// Everything a gateway session reports back to the engine.
#[derive(Debug)]
pub enum GatewayEvent {
    Ready {
        bot_user_id: String,
        bot_name: String,
    },
    Message(InboundMessage),
    Command(SlashCommand, CommandReply),
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
}
