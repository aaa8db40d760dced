//! # Configuration
//!
//! Manages the loading and parsing of the engine's configuration file (`config.yaml`).
//! Defines the structs for the Discord connection, the chat-completion endpoint,
//! engine limits and retry policies.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::domain::paths;

/// Main configuration structure.
/// Matches the layout of `data/config.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub reconnect: RetryConfig,
    #[serde(default = "default_post_retry")]
    pub post_retry: RetryConfig,
    #[serde(default)]
    pub defaults: GuildDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where the `enabled` intent is persisted. `None` keeps it in memory only.
    #[serde(default)]
    pub state_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig::default(),
            llm: LlmConfig::default(),
            engine: EngineConfig::default(),
            reconnect: RetryConfig::default(),
            post_retry: default_post_retry(),
            defaults: GuildDefaults::default(),
            logging: LoggingConfig::default(),
            state_file: None,
        }
    }
}

impl AppConfig {
    /// Reads and parses a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context(crate::strings::logs::CONFIG_PARSE_ERROR)
    }
}

/// Credentials and startup behaviour for the Discord gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Start automatically on launch when the persisted intent is `enabled`.
    #[serde(default)]
    pub autostart: bool,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_env: default_token_env(),
            autostart: false,
        }
    }
}

impl DiscordConfig {
    /// Token from the file, falling back to the configured environment variable.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

fn default_token_env() -> String {
    "DISCORD_BOT_TOKEN".to_string()
}

/// OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>, // e.g. "OPENAI_API_KEY"
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            api_key_env: None,
            default_model: default_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8045/v1".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}

/// Limits that bound the engine's memory use.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages_per_channel: usize,
    /// Number of stored turns sent to the model with each request.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    #[serde(default = "default_max_logs")]
    pub max_log_entries: usize,
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
    #[serde(default = "default_chunk_size")]
    pub reply_chunk_size: usize,
    /// How long `stop` waits for in-flight sends before disconnecting.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_messages_per_channel: default_max_messages(),
            context_limit: default_context_limit(),
            max_log_entries: default_max_logs(),
            subscriber_queue: default_subscriber_queue(),
            reply_chunk_size: default_chunk_size(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

fn default_max_messages() -> usize {
    200
}
fn default_context_limit() -> usize {
    20
}
fn default_max_logs() -> usize {
    200
}
fn default_subscriber_queue() -> usize {
    256
}
fn default_chunk_size() -> usize {
    2000
}
fn default_shutdown_grace() -> u64 {
    5000
}

/// Exponential backoff settings.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_max_retries() -> u32 {
    5
}

fn default_post_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 500,
        max_delay_ms: 10_000,
        max_retries: 3,
    }
}

/// Values a guild starts with before anyone changes them.
#[derive(Debug, Deserialize, Clone)]
pub struct GuildDefaults {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Overrides `llm.default_model` for new guilds.
    #[serde(default)]
    pub chat_model: Option<String>,
}

impl Default for GuildDefaults {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            chat_model: None,
        }
    }
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_log_file")]
    pub file: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_dir() -> String {
    paths::DATA_DIR.to_string()
}
fn default_log_file() -> String {
    paths::SESSION_LOG.to_string()
}
fn default_log_filter() -> String {
    "info,serenity=warn,tracing::span=warn,hyper=warn".to_string()
}
