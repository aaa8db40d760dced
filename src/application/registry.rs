//! # Channel Registry
//!
//! In-memory configuration for every guild and channel the bot has seen.
//! Entries are created lazily on first message or first command and live for
//! the lifetime of the process.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::application::store::MessageStore;
use crate::domain::error::ConfigError;
use crate::domain::types::{ChannelConfig, ChannelId, ConfigPatch, GuildConfig, GuildId, InboundMessage};

#[derive(Debug, Clone)]
struct GuildEntry {
    config: GuildConfig,
    channels: BTreeMap<ChannelId, ChannelConfig>,
}

#[derive(Debug, Default)]
struct Inner {
    guilds: BTreeMap<GuildId, GuildEntry>,
    /// Back-reference from a channel to the guild that owns it.
    channel_guild: HashMap<ChannelId, GuildId>,
}

impl Inner {
    fn bind(
        &mut self,
        defaults: &GuildConfig,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<&mut ChannelConfig, ConfigError> {
        if let Some(bound) = self.channel_guild.get(channel_id)
            && bound != guild_id
        {
            return Err(ConfigError::GuildMismatch {
                channel: channel_id.to_string(),
                bound: bound.clone(),
            });
        }
        self.channel_guild
            .insert(channel_id.to_string(), guild_id.to_string());
        let guild = self
            .guilds
            .entry(guild_id.to_string())
            .or_insert_with(|| GuildEntry {
                config: defaults.clone(),
                channels: BTreeMap::new(),
            });
        Ok(guild.channels.entry(channel_id.to_string()).or_default())
    }

    fn guild_mut(&mut self, defaults: &GuildConfig, guild_id: &str) -> &mut GuildEntry {
        self.guilds
            .entry(guild_id.to_string())
            .or_insert_with(|| GuildEntry {
                config: defaults.clone(),
                channels: BTreeMap::new(),
            })
    }

    fn config_of(&self, channel_id: &str) -> Option<ChannelConfig> {
        let guild_id = self.channel_guild.get(channel_id)?;
        self.guilds.get(guild_id)?.channels.get(channel_id).copied()
    }
}

/// Aggregate view returned by `get stats`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BotStats {
    pub guilds: Vec<GuildStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GuildStats {
    pub guild_id: GuildId,
    pub chat_model: String,
    pub channels: Vec<ChannelStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelStats {
    pub channel_id: ChannelId,
    pub is_listening: bool,
    pub shared_chat: bool,
    pub listen_mode: bool,
    /// Messages currently retained.
    pub message_count: usize,
    /// Messages ever recorded, including evicted ones.
    pub total_messages: u64,
}

pub struct ChannelRegistry {
    defaults: GuildConfig,
    inner: RwLock<Inner>,
}

impl ChannelRegistry {
    pub fn new(defaults: GuildConfig) -> Self {
        Self {
            defaults,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Whether the engine should answer `message` in `channel_id`.
    ///
    /// Requires listening, a human author, and either the same channel or, with
    /// shared chat enabled, a channel of the same guild.
    pub fn is_eligible(&self, channel_id: &str, message: &InboundMessage, bot_user_id: &str) -> bool {
        if message.author_id == bot_user_id {
            return false;
        }
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let Some(config) = inner.config_of(channel_id) else {
            return false;
        };
        if !config.is_listening {
            return false;
        }
        if message.channel_id == channel_id {
            return true;
        }
        config.shared_chat
            && inner.channel_guild.get(&message.channel_id) == inner.channel_guild.get(channel_id)
    }

    /// Registers a channel under its guild if this is the first time it is seen.
    pub fn ensure_channel(&self, guild_id: &str, channel_id: &str) -> Result<ChannelConfig, ConfigError> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.bind(&self.defaults, guild_id, channel_id).map(|c| *c)
    }

    /// Applies a partial update, creating the guild and channel if absent.
    pub fn update_config(
        &self,
        guild_id: &str,
        channel_id: &str,
        patch: &ConfigPatch,
    ) -> Result<ChannelConfig, ConfigError> {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let config = inner.bind(&self.defaults, guild_id, channel_id)?;
        patch.apply(config);
        Ok(*config)
    }

    pub fn channel_config(&self, channel_id: &str) -> Option<ChannelConfig> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .config_of(channel_id)
    }

    pub fn guild_of(&self, channel_id: &str) -> Option<GuildId> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .channel_guild
            .get(channel_id)
            .cloned()
    }

    /// Model and persona of a guild; defaults for guilds never seen.
    pub fn guild_config(&self, guild_id: &str) -> GuildConfig {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .guilds
            .get(guild_id)
            .map(|g| g.config.clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn set_chat_model(&self, guild_id: &str, model: &str) -> GuildConfig {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let guild = inner.guild_mut(&self.defaults, guild_id);
        guild.config.chat_model = model.to_string();
        guild.config.clone()
    }

    pub fn set_system_prompt(&self, guild_id: &str, prompt: &str) -> GuildConfig {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let guild = inner.guild_mut(&self.defaults, guild_id);
        guild.config.system_prompt = prompt.to_string();
        guild.config.clone()
    }

    /// Channels of a guild whose history feeds the guild-wide context.
    pub fn shared_channels(&self, guild_id: &str) -> Vec<ChannelId> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .guilds
            .get(guild_id)
            .map(|g| {
                g.channels
                    .iter()
                    .filter(|(_, c)| c.shared_chat)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn channels_in_guild(&self, guild_id: &str) -> Vec<ChannelId> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .guilds
            .get(guild_id)
            .map(|g| g.channels.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Read-only projection of every guild and channel with message counts.
    pub fn stats(&self, store: &MessageStore) -> BotStats {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let guilds = inner
            .guilds
            .iter()
            .map(|(guild_id, guild)| GuildStats {
                guild_id: guild_id.clone(),
                chat_model: guild.config.chat_model.clone(),
                channels: guild
                    .channels
                    .iter()
                    .map(|(channel_id, config)| {
                        let counts = store.counts(channel_id);
                        ChannelStats {
                            channel_id: channel_id.clone(),
                            is_listening: config.is_listening,
                            shared_chat: config.shared_chat,
                            listen_mode: config.listen_mode,
                            message_count: counts.retained,
                            total_messages: counts.received,
                        }
                    })
                    .collect(),
            })
            .collect();
        BotStats { guilds }
    }
}
