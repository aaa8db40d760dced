//! # Errors
//!
//! One error enum per concern. Only [`ServiceError`] crosses the command boundary.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a gateway implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("credential rejected: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by the platform")]
    RateLimited { retry_after: Option<Duration> },
    #[error("no active gateway session")]
    NotConnected,
    #[error("platform error: {0}")]
    Platform(String),
}

impl GatewayError {
    /// Worth another attempt with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Network(_) | GatewayError::RateLimited { .. })
    }
}

/// Failures of the external chat-completion call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by the model provider")]
    RateLimited,
    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("model returned an empty reply")]
    EmptyResponse,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("channel {0} has never received a message")]
    ChannelNotFound(String),
}

/// Invalid or unauthorised configuration input. Reported to the issuing user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("{0}")]
    Invalid(String),
    #[error("administrator permission required")]
    Unauthorized,
    #[error("this command only works inside a server")]
    MissingGuild,
    #[error("channel {channel} already belongs to guild {bound}")]
    GuildMismatch { channel: String, bound: String },
}

/// Failures of the public command surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("bot is already running")]
    AlreadyRunning,
    #[error("bot is not running")]
    NotRunning,
    #[error("could not reach the gateway: {0}")]
    Network(String),
}
