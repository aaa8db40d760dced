//! # Messages
//!
//! User-facing replies to slash commands.

use crate::domain::types::{ChannelConfig, GuildConfig};

pub const AUTH_DENIED: &str = "🚫 **Authorization Denied**. Administrator permission required.";
pub const GUILD_ONLY: &str = "❌ This command only works inside a server.";
pub const COMMAND_TIMEOUT: &str = "⌛ The bot is busy, try again in a moment.";

pub fn unknown_command(name: &str) -> String {
    format!("❓ Unknown command `/{name}`.")
}

pub fn invalid_input(err: &str) -> String {
    format!("❌ {err}")
}

fn on_off(flag: bool) -> &'static str {
    if flag { "✅ On" } else { "❌ Off" }
}

/// Summary shown by `/settings`.
pub fn settings_summary(channel: &ChannelConfig, guild: &GuildConfig) -> String {
    let persona: String = if guild.system_prompt.chars().count() > 100 {
        format!("{}...", guild.system_prompt.chars().take(100).collect::<String>())
    } else {
        guild.system_prompt.clone()
    };
    format!(
        "**⚙️ Bot Settings**\n\
         Listening: {}\n\
         Shared Chat: {}\n\
         Listen Mode: {}\n\
         Current Chat Model: `{}`\n\
         Personality: {}",
        on_off(channel.is_listening),
        on_off(channel.shared_chat),
        on_off(channel.listen_mode),
        guild.chat_model,
        persona
    )
}

pub fn model_set(model: &str) -> String {
    format!("✅ Chat model set to `{model}`.")
}

pub const PERSONA_SET: &str = "✅ Personality updated.";
pub const CHANNEL_CLEARED: &str = "🧹 Memory cleared for this channel.";

pub fn guild_cleared(channels: usize) -> String {
    format!("🧹 Memory cleared for {channels} channel(s) in this server.")
}
