//! # Discord Gateway
//!
//! `Gateway` implementation over serenity. A connect validates the token over
//! REST, then runs a gateway client in the background and translates its
//! callbacks into [`GatewayEvent`]s. Slash commands are registered globally on
//! every `ready`.
//!
//! Inbound messages are enriched before they reach the engine: small text
//! attachments are downloaded, the replied-to message is quoted and every
//! mentioned user, role or channel is resolved to a name.

use async_trait::async_trait;
use regex::Regex;
use serenity::all::{
    Attachment, ChannelId, Command, CommandDataOptionValue, CommandInteraction, CommandOptionType,
    Context, CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EventHandler, GatewayIntents, GuildId, Interaction,
    Message as SerenityMessage, Permissions, Ready,
};
use serenity::Client;
use serenity::gateway::{GatewayError as ShardError, ShardManager};
use serenity::http::Http;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::error::GatewayError;
use crate::domain::traits::{Gateway, GatewaySession};
use crate::domain::types::{
    CommandOption, CommandReply, GatewayEvent, InboundMessage, Mention, MentionKind, OptionValue,
    QuotedMessage, SlashCommand, TextAttachment,
};
use crate::strings::{logs, messages};

/// How long an interaction waits for the engine before answering on its own.
/// Discord drops interactions that are not acknowledged within three seconds.
const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_millis(2500);
const RUNNER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TEXT_ATTACHMENT_BYTES: u32 = 200 * 1024;
const TEXT_EXTENSIONS: [&str; 6] = [".rs", ".js", ".ts", ".json", ".md", ".txt"];

fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
}

fn map_error(err: serenity::Error) -> GatewayError {
    match &err {
        serenity::Error::Http(http) => match http.status_code().map(|s| s.as_u16()) {
            Some(401) | Some(403) => GatewayError::Auth(err.to_string()),
            Some(429) => GatewayError::RateLimited { retry_after: None },
            Some(code) if code >= 500 => GatewayError::Network(err.to_string()),
            Some(_) => GatewayError::Platform(err.to_string()),
            None => GatewayError::Network(err.to_string()),
        },
        serenity::Error::Gateway(ShardError::InvalidAuthentication) => {
            GatewayError::Auth(err.to_string())
        }
        serenity::Error::Gateway(_) | serenity::Error::Io(_) => {
            GatewayError::Network(err.to_string())
        }
        _ => GatewayError::Platform(err.to_string()),
    }
}

fn parse_channel_id(raw: &str) -> Result<ChannelId, GatewayError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
        .ok_or_else(|| GatewayError::Platform(format!("invalid channel id `{raw}`")))
}

/// Server nickname, then global display name, then username.
fn display_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    nick.or(global_name)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(username)
        .to_string()
}

fn is_text_file(filename: &str, content_type: Option<&str>) -> bool {
    content_type.is_some_and(|t| t.starts_with("text/"))
        || TEXT_EXTENSIONS.iter().any(|ext| filename.ends_with(ext))
}

/// Channel ids referenced as `<#id>`, first occurrence order.
fn channel_mentions(content: &str) -> Vec<u64> {
    let Ok(pattern) = Regex::new(r"<#(\d+)>") else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for id in pattern
        .captures_iter(content)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .filter(|id| *id != 0)
    {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn convert_option(value: &CommandDataOptionValue) -> Option<OptionValue> {
    match value {
        CommandDataOptionValue::Boolean(b) => Some(OptionValue::Bool(*b)),
        CommandDataOptionValue::String(s) => Some(OptionValue::String(s.clone())),
        CommandDataOptionValue::Integer(i) => Some(OptionValue::Integer(*i)),
        _ => None,
    }
}

fn bool_option(name: &str, description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Boolean, name, description).required(false)
}

/// The slash commands understood by the router.
fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("settings")
            .description("Show or change how the bot behaves in this channel")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(bool_option("listen", "Reply to messages in this channel"))
            .add_option(bool_option("shared", "Share conversation memory across the server"))
            .add_option(bool_option("listen_mode", "Alternate listening mode")),
        CreateCommand::new("model")
            .description("Set the chat model for this server")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "name", "Model identifier")
                    .required(true),
            ),
        CreateCommand::new("persona")
            .description("Set the bot personality for this server")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "prompt", "System prompt")
                    .required(true)
                    .max_length(4000),
            ),
        CreateCommand::new("clear")
            .description("Clear the bot's memory")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "scope", "What to clear")
                    .required(false)
                    .add_string_choice("This channel", "channel")
                    .add_string_choice("Whole server", "guild"),
            ),
    ]
}

struct RelayHandler {
    events: mpsc::Sender<GatewayEvent>,
    files: reqwest::Client,
}

impl RelayHandler {
    async fn forward(&self, event: GatewayEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event dropped, engine no longer listening");
        }
    }

    async fn download(&self, url: &str) -> Result<String, reqwest::Error> {
        self.files
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Text files small enough to inline. Failed downloads are skipped.
    async fn text_attachments(&self, attachments: &[Attachment]) -> Vec<TextAttachment> {
        let mut files = Vec::new();
        for attachment in attachments {
            if !is_text_file(&attachment.filename, attachment.content_type.as_deref())
                || attachment.size >= MAX_TEXT_ATTACHMENT_BYTES
            {
                continue;
            }
            match self.download(&attachment.url).await {
                Ok(text) => files.push(TextAttachment {
                    filename: attachment.filename.clone(),
                    text,
                }),
                Err(e) => warn!("{}", logs::attachment_failed(&attachment.filename, &e.to_string())),
            }
        }
        files
    }

    async fn resolve_mentions(ctx: &Context, msg: &SerenityMessage, guild_id: GuildId) -> Vec<Mention> {
        let mut mentions: Vec<Mention> = msg
            .mentions
            .iter()
            .map(|user| Mention {
                kind: MentionKind::User,
                id: user.id.to_string(),
                name: display_name(None, user.global_name.as_deref(), &user.name),
            })
            .collect();

        if !msg.mention_roles.is_empty() {
            match guild_id.roles(&ctx.http).await {
                Ok(roles) => mentions.extend(msg.mention_roles.iter().filter_map(|id| {
                    roles.get(id).map(|role| Mention {
                        kind: MentionKind::Role,
                        id: id.to_string(),
                        name: role.name.clone(),
                    })
                })),
                Err(e) => debug!("Role lookup failed: {}", e),
            }
        }

        for id in channel_mentions(&msg.content) {
            let name = match ChannelId::new(id).to_channel(ctx).await {
                Ok(channel) => channel.guild().map(|c| c.name),
                Err(e) => {
                    debug!("Channel lookup for {} failed: {}", id, e);
                    None
                }
            };
            mentions.push(Mention {
                kind: MentionKind::Channel,
                id: id.to_string(),
                name: name.unwrap_or_else(|| "unknown-channel".to_string()),
            });
        }
        mentions
    }

    fn to_slash_command(command: &CommandInteraction) -> SlashCommand {
        let is_admin = command
            .member
            .as_ref()
            .and_then(|m| m.permissions)
            .is_some_and(|p| p.administrator());
        SlashCommand {
            name: command.data.name.clone(),
            options: command
                .data
                .options
                .iter()
                .filter_map(|o| {
                    convert_option(&o.value).map(|value| CommandOption {
                        name: o.name.clone(),
                        value,
                    })
                })
                .collect(),
            guild_id: command.guild_id.map(|g| g.to_string()),
            channel_id: command.channel_id.to_string(),
            user_name: command.user.name.clone(),
            is_admin,
        }
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(username = %ready.user.name, "Discord gateway ready");
        self.forward(GatewayEvent::Ready {
            bot_user_id: ready.user.id.to_string(),
            bot_name: ready.user.name.clone(),
        })
        .await;

        let commands = command_definitions();
        let count = commands.len();
        match Command::set_global_commands(&ctx.http, commands).await {
            Ok(_) => info!("{}", logs::commands_registered(count)),
            Err(e) => warn!("{}", logs::commands_register_failed(&e.to_string())),
        }
    }

    async fn message(&self, ctx: Context, msg: SerenityMessage) {
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        if msg.content.trim().is_empty() && msg.attachments.is_empty() {
            return;
        }
        let attachments = self.text_attachments(&msg.attachments).await;
        if msg.content.trim().is_empty() && attachments.is_empty() {
            return;
        }
        let author_name = display_name(
            msg.member.as_ref().and_then(|m| m.nick.as_deref()),
            msg.author.global_name.as_deref(),
            &msg.author.name,
        );
        let reply_to = msg.referenced_message.as_deref().map(|quoted| QuotedMessage {
            author_name: display_name(None, quoted.author.global_name.as_deref(), &quoted.author.name),
            content: quoted.content.clone(),
        });
        let mentions = Self::resolve_mentions(&ctx, &msg, guild_id).await;

        self.forward(GatewayEvent::Message(InboundMessage {
            guild_id: guild_id.to_string(),
            channel_id: msg.channel_id.to_string(),
            author_id: msg.author.id.to_string(),
            author_name,
            content: msg.content.clone(),
            attachments,
            reply_to,
            mentions,
        }))
        .await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let (reply, rx) = CommandReply::channel();
        self.forward(GatewayEvent::Command(Self::to_slash_command(&command), reply))
            .await;

        let text = match tokio::time::timeout(COMMAND_REPLY_TIMEOUT, rx).await {
            Ok(Ok(text)) => text,
            _ => messages::COMMAND_TIMEOUT.to_string(),
        };
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(text)
                .ephemeral(true),
        );
        if let Err(e) = command.create_response(&ctx.http, response).await {
            warn!("Failed to answer /{}: {}", command.data.name, e);
        }
    }
}

pub struct DiscordGateway {
    files: reqwest::Client,
}

impl DiscordGateway {
    pub fn new() -> anyhow::Result<Self> {
        let files = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { files })
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    async fn connect(
        &self,
        token: &str,
        events: mpsc::Sender<GatewayEvent>,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        let me = Http::new(token)
            .get_current_user()
            .await
            .map_err(map_error)?;
        debug!(bot = %me.name, "Token accepted");

        let mut client = Client::builder(token, intents())
            .event_handler(RelayHandler {
                events: events.clone(),
                files: self.files.clone(),
            })
            .await
            .map_err(map_error)?;

        let http = client.http.clone();
        let shard_manager = client.shard_manager.clone();
        let closing = Arc::new(AtomicBool::new(false));

        let runner_closing = closing.clone();
        let runner = tokio::spawn(async move {
            let reason = match client.start().await {
                Ok(()) => "gateway closed".to_string(),
                Err(e) => e.to_string(),
            };
            if !runner_closing.load(Ordering::Acquire) {
                let _ = events.send(GatewayEvent::Disconnected { reason }).await;
            }
        });

        Ok(Arc::new(DiscordSession {
            http,
            shard_manager,
            closing,
            runner: Mutex::new(Some(runner)),
            bot_user_id: me.id.to_string(),
        }))
    }
}

pub struct DiscordSession {
    http: Arc<Http>,
    shard_manager: Arc<ShardManager>,
    closing: Arc<AtomicBool>,
    runner: Mutex<Option<JoinHandle<()>>>,
    bot_user_id: String,
}

#[async_trait]
impl GatewaySession for DiscordSession {
    fn bot_user_id(&self) -> String {
        self.bot_user_id.clone()
    }

    async fn post(&self, channel_id: &str, content: &str) -> Result<(), GatewayError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(GatewayError::NotConnected);
        }
        parse_channel_id(channel_id)?
            .say(&self.http, content)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn disconnect(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shard_manager.shutdown_all().await;
        if let Some(runner) = self.runner.lock().await.take()
            && tokio::time::timeout(RUNNER_SHUTDOWN_TIMEOUT, runner).await.is_err()
        {
            warn!("Discord client did not shut down in time");
        }
    }
}
