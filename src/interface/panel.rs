//! # Panel Bridge
//!
//! The administrative command surface as JSON lines. Each request is one JSON
//! object tagged by `command`; each answer is `{"ok": true, "data": ...}` or
//! `{"ok": false, "error": "..."}`. Log entries are pushed as
//! `{"event": "discord-log", "data": ...}` whenever they are emitted.
//!
//! The older `*_discord_*` command names are accepted as aliases.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::service::BotService;
use crate::domain::error::{ConfigError, ServiceError};
use crate::domain::types::LogEntry;

pub const LOG_EVENT: &str = "discord-log";

fn default_limit() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PanelRequest {
    #[serde(alias = "get_discord_bot_status")]
    GetStatus,
    #[serde(alias = "start_discord_bot")]
    Start { bot_token: String },
    #[serde(alias = "stop_discord_bot")]
    Stop,
    #[serde(alias = "get_discord_logs")]
    GetLogs,
    #[serde(alias = "clear_discord_logs")]
    ClearLogs,
    #[serde(alias = "get_discord_bot_stats")]
    GetStats,
    #[serde(alias = "get_discord_channel_messages")]
    GetChannelMessages {
        channel_id: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    #[serde(alias = "clear_discord_channel_messages")]
    ClearChannelMessages { channel_id: String },
}

/// A request plus the optional correlation id echoed back in its response.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(flatten)]
    request: PanelRequest,
}

#[derive(Debug, Serialize)]
pub struct PanelResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PanelResponse {
    pub fn success(id: Option<Value>, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: impl ToString) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"{e}"}}"#))
    }
}

#[derive(Debug, Serialize)]
struct PanelEvent<'a> {
    event: &'static str,
    data: &'a LogEntry,
}

/// Serialises a log entry as a push event line.
pub fn event_line(entry: &LogEntry) -> String {
    serde_json::to_string(&PanelEvent {
        event: LOG_EVENT,
        data: entry,
    })
    .unwrap_or_default()
}

fn parse_envelope(line: &str) -> Result<Envelope, ConfigError> {
    serde_json::from_str(line).map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// Parses one request line. Unknown commands and malformed payloads are
/// rejected without reaching the engine.
pub fn parse(line: &str) -> Result<PanelRequest, ConfigError> {
    parse_envelope(line).map(|envelope| envelope.request)
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

pub async fn dispatch(service: &BotService, request: PanelRequest) -> Result<Value, ServiceError> {
    match request {
        PanelRequest::GetStatus => Ok(to_json(&service.get_status())),
        PanelRequest::Start { bot_token } => service.start(&bot_token).await.map(|s| to_json(&s)),
        PanelRequest::Stop => service.stop().await.map(|s| to_json(&s)),
        PanelRequest::GetLogs => Ok(to_json(&service.get_logs())),
        PanelRequest::ClearLogs => {
            service.clear_logs();
            Ok(Value::Null)
        }
        PanelRequest::GetStats => Ok(to_json(&service.get_stats())),
        PanelRequest::GetChannelMessages { channel_id, limit } => {
            Ok(to_json(&service.get_channel_messages(&channel_id, limit)))
        }
        PanelRequest::ClearChannelMessages { channel_id } => {
            service.clear_channel_messages(&channel_id);
            Ok(Value::Null)
        }
    }
}

/// Runs one request line end to end and returns the response line.
pub async fn handle_line(service: &BotService, line: &str) -> String {
    let envelope = match parse_envelope(line) {
        Ok(envelope) => envelope,
        Err(e) => return PanelResponse::failure(None, e).to_line(),
    };
    match dispatch(service, envelope.request).await {
        Ok(data) => PanelResponse::success(envelope.id, data),
        Err(e) => PanelResponse::failure(envelope.id, e),
    }
    .to_line()
}
