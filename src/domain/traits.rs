//! # Domain Traits
//!
//! Abstract interfaces for the two remote collaborators (messaging gateway, chat model).
//! Allows for pluggable implementations in the Infrastructure layer.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::error::{CompletionError, GatewayError};
use crate::domain::types::{CompletionRequest, GatewayEvent};

/// Abstract interface for a messaging platform (e.g., Discord).
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Authenticate with `token` and open a session.
    ///
    /// Inbound events, including a final `Disconnected` when the session drops
    /// on its own, are pushed into `events`.
    async fn connect(
        &self,
        token: &str,
        events: mpsc::Sender<GatewayEvent>,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError>;
}

/// A live, authenticated connection.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    /// Platform id of the bot account, used for loop prevention.
    fn bot_user_id(&self) -> String;

    /// Post a text message. Content is already within the platform limit.
    async fn post(&self, channel_id: &str, content: &str) -> Result<(), GatewayError>;

    /// Close the session. Must not emit `Disconnected`.
    async fn disconnect(&self);
}

/// Abstract interface for an external chat-completion capability.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}
