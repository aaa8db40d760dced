//! # Bot Service
//!
//! The one object the outside world talks to. Built once with
//! [`BotService::new`], torn down with [`BotService::shutdown`]; everything
//! else in the engine is reached through it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::application::backoff::Backoff;
use crate::application::connection::{ConnectionManager, DispatchContext, EventSink};
use crate::application::engine::ChatOrchestrator;
use crate::application::logging::LogBroadcaster;
use crate::application::registry::{BotStats, ChannelRegistry};
use crate::application::router::{CommandRouter, Ingest};
use crate::application::state::IntentStore;
use crate::application::store::MessageStore;
use crate::domain::config::AppConfig;
use crate::domain::error::ServiceError;
use crate::domain::traits::{ChatCompletion, Gateway};
use crate::domain::types::{BotStatus, GatewayEvent, GuildConfig, LogEntry, Message};
use crate::strings::logs;

/// Routes gateway events through the router and, when wanted, the orchestrator.
struct Pipeline {
    router: CommandRouter,
    orchestrator: ChatOrchestrator,
}

#[async_trait]
impl EventSink for Pipeline {
    async fn handle(&self, event: GatewayEvent, ctx: DispatchContext) {
        match event {
            GatewayEvent::Message(message) => {
                if self.router.ingest(&message, &ctx.bot_user_id) == Ingest::Eligible {
                    self.orchestrator.respond(&message, &ctx.cancel).await;
                }
            }
            GatewayEvent::Command(cmd, reply) => self.router.handle_command(cmd, reply),
            GatewayEvent::Ready { .. } | GatewayEvent::Disconnected { .. } => {}
        }
    }
}

pub struct BotService {
    registry: Arc<ChannelRegistry>,
    store: Arc<MessageStore>,
    logs: Arc<LogBroadcaster>,
    connection: Arc<ConnectionManager>,
    intent: IntentStore,
    pipeline: Arc<Pipeline>,
}

impl BotService {
    pub fn new(config: &AppConfig, gateway: Arc<dyn Gateway>, completion: Arc<dyn ChatCompletion>) -> Self {
        let intent = match &config.state_file {
            Some(path) => IntentStore::load(path),
            None => IntentStore::in_memory(),
        };
        Self::with_intent(config, gateway, completion, intent)
    }

    fn with_intent(
        config: &AppConfig,
        gateway: Arc<dyn Gateway>,
        completion: Arc<dyn ChatCompletion>,
        intent: IntentStore,
    ) -> Self {
        let defaults = GuildConfig {
            chat_model: config
                .defaults
                .chat_model
                .clone()
                .unwrap_or_else(|| config.llm.default_model.clone()),
            system_prompt: config.defaults.system_prompt.clone(),
        };
        let registry = Arc::new(ChannelRegistry::new(defaults));
        let store = Arc::new(MessageStore::new(config.engine.max_messages_per_channel));
        let logs = Arc::new(LogBroadcaster::new(
            config.engine.max_log_entries,
            config.engine.subscriber_queue,
        ));
        let connection = Arc::new(ConnectionManager::new(
            gateway,
            logs.clone(),
            Backoff::from_config(&config.reconnect),
            config.engine.reply_chunk_size,
            Duration::from_millis(config.engine.shutdown_grace_ms),
        ));
        let pipeline = Arc::new(Pipeline {
            router: CommandRouter::new(registry.clone(), store.clone(), logs.clone()),
            orchestrator: ChatOrchestrator::new(
                registry.clone(),
                store.clone(),
                logs.clone(),
                completion,
                connection.clone(),
                config.engine.context_limit,
                Backoff::from_config(&config.post_retry),
            ),
        });

        Self {
            registry,
            store,
            logs,
            connection,
            intent,
            pipeline,
        }
    }

    pub fn get_status(&self) -> BotStatus {
        BotStatus {
            running: self.connection.is_running(),
            enabled: self.intent.enabled(),
        }
    }

    /// Connects with `token` and records the intent to keep running.
    pub async fn start(&self, token: &str) -> Result<BotStatus, ServiceError> {
        if token.trim().is_empty() {
            self.logs.error(logs::EMPTY_TOKEN);
            return Err(ServiceError::Auth("bot token is empty".to_string()));
        }
        self.connection
            .start(token.trim(), self.pipeline.clone())
            .await?;
        self.intent.set_enabled(true);
        Ok(self.get_status())
    }

    /// Disconnects and records the intent to stay stopped.
    pub async fn stop(&self) -> Result<BotStatus, ServiceError> {
        self.connection.stop().await?;
        self.intent.set_enabled(false);
        Ok(self.get_status())
    }

    /// Starts the bot if it was running when the process last exited.
    pub async fn resume(&self, token: Option<&str>) -> Result<bool, ServiceError> {
        if !self.intent.enabled() {
            return Ok(false);
        }
        match token {
            Some(token) => self.start(token).await.map(|_| true),
            None => {
                self.logs.warn(logs::EMPTY_TOKEN);
                Ok(false)
            }
        }
    }

    /// Process teardown. Stops the session but keeps the persisted intent.
    pub async fn shutdown(&self) {
        self.logs.info(logs::SHUTDOWN);
        let _ = self.connection.stop().await;
    }

    pub fn get_logs(&self) -> Vec<LogEntry> {
        self.logs.snapshot()
    }

    pub fn clear_logs(&self) {
        self.logs.clear();
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.logs.subscribe()
    }

    pub fn get_stats(&self) -> BotStats {
        self.registry.stats(&self.store)
    }

    /// Most recent messages of a channel; empty for channels never seen.
    pub fn get_channel_messages(&self, channel_id: &str, limit: usize) -> Vec<Message> {
        self.store.history(channel_id, limit).unwrap_or_default()
    }

    pub fn clear_channel_messages(&self, channel_id: &str) {
        self.store.clear(channel_id);
    }
}
