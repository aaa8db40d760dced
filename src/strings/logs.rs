//! Operator log lines. Shown in the panel and mirrored into the session log.

pub const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
pub const STARTING: &str = "🚀 Discord Bot Starting...";
pub const VALIDATING_TOKEN: &str = "🔑 Validating bot token...";
pub const CONNECTING: &str = "🔌 Connecting to Discord Gateway...";
pub const CONNECTED: &str = "✅ Connected to Discord!";
pub const LISTENING: &str = "📡 Bot is now online and listening...";
pub const STOPPING: &str = "🛑 Stopping Discord Bot...";
pub const DISCONNECTING: &str = "🔌 Disconnecting from Discord...";
pub const STOPPED: &str = "✅ Bot stopped successfully";
pub const NOT_RUNNING: &str = "⚠️  Bot was not running";
pub const ALREADY_RUNNING: &str = "⚠️  Bot is already running";
pub const EMPTY_TOKEN: &str = "❌ Bot token is empty!";
pub const CONFIG_PARSE_ERROR: &str = "Failed to parse YAML";
pub const SHUTDOWN: &str = "Shutting down...";

pub fn ready(name: &str) -> String {
    format!("🤖 Logged in as {name}")
}

pub fn auth_failed(err: &str) -> String {
    format!("❌ Authentication failed: {err}")
}

pub fn connect_failed(err: &str) -> String {
    format!("❌ Could not connect to Discord: {err}")
}

pub fn connect_retry(attempt: u32, max: u32, delay_ms: u128, err: &str) -> String {
    format!("⚠️  Connection failed (Attempt {attempt}/{max}): {err}. Retrying in {delay_ms}ms...")
}

pub fn disconnected(reason: &str) -> String {
    format!("⚠️  Disconnected from Discord: {reason}")
}

pub const RECONNECTED: &str = "✅ Reconnected to Discord";

pub fn crashed(err: &str) -> String {
    format!("❌ Bot crashed: {err}")
}

pub fn reconnect_exhausted(attempts: u32) -> String {
    format!("reconnect failed after {attempts} attempts")
}

pub fn shutdown_grace_elapsed(ms: u64) -> String {
    format!("⚠️  In-flight work did not finish within {ms}ms, disconnecting anyway")
}

pub fn message_received(author: &str, channel_id: &str, preview: &str) -> String {
    format!("💬 {author} in #{channel_id}: {preview}")
}

pub fn reply_posted(channel_id: &str, chars: usize) -> String {
    format!("📤 Replied in #{channel_id} ({chars} chars)")
}

pub fn attachment_failed(filename: &str, err: &str) -> String {
    format!("Failed to download attachment '{filename}': {err}")
}

pub fn reply_partial(channel_id: &str, sent: usize, total: usize) -> String {
    format!("⚠️ Reply in #{channel_id} cut short: {sent} of {total} parts posted")
}

pub fn completion_failed(channel_id: &str, err: &str) -> String {
    format!("❌ Chat completion failed for #{channel_id}: {err}")
}

pub fn post_rate_limited(channel_id: &str, attempt: u32, max: u32, delay_ms: u128) -> String {
    format!("⚠️  Rate limited posting to #{channel_id} (Attempt {attempt}/{max}). Retrying in {delay_ms}ms...")
}

pub fn post_failed(channel_id: &str, err: &str) -> String {
    format!("❌ Failed to post reply in #{channel_id}: {err}")
}

pub fn reply_cancelled(channel_id: &str) -> String {
    format!("🛑 Reply for #{channel_id} cancelled")
}

pub fn command_received(user: &str, command: &str) -> String {
    format!("⚙️  /{command} from {user}")
}

pub fn command_rejected(user: &str, command: &str, err: &str) -> String {
    format!("⚠️  /{command} from {user} rejected: {err}")
}

pub fn commands_registered(count: usize) -> String {
    format!("✅ Registered {count} slash commands")
}

pub fn commands_register_failed(err: &str) -> String {
    format!("⚠️  Failed to register slash commands: {err}")
}

pub fn channel_mismatch(err: &str) -> String {
    format!("⚠️  Ignoring message: {err}")
}
