//! # Chat Orchestrator
//!
//! Answers eligible messages: assembles the context window, calls the chat
//! model, posts the reply and records it. A failed or cancelled completion
//! never produces a post.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::backoff::Backoff;
use crate::application::connection::ConnectionManager;
use crate::application::logging::LogBroadcaster;
use crate::application::registry::ChannelRegistry;
use crate::application::store::MessageStore;
use crate::domain::error::{CompletionError, GatewayError};
use crate::domain::traits::ChatCompletion;
use crate::domain::types::{CompletionRequest, InboundMessage, Message, PromptMessage, Role};
use crate::strings::{logs, prompts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Posted,
    Failed,
    Cancelled,
}

pub struct ChatOrchestrator {
    registry: Arc<ChannelRegistry>,
    store: Arc<MessageStore>,
    logs: Arc<LogBroadcaster>,
    completion: Arc<dyn ChatCompletion>,
    connection: Arc<ConnectionManager>,
    context_limit: usize,
    post_retry: Backoff,
}

impl ChatOrchestrator {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        store: Arc<MessageStore>,
        logs: Arc<LogBroadcaster>,
        completion: Arc<dyn ChatCompletion>,
        connection: Arc<ConnectionManager>,
        context_limit: usize,
        post_retry: Backoff,
    ) -> Self {
        Self {
            registry,
            store,
            logs,
            completion,
            connection,
            context_limit,
            post_retry,
        }
    }

    /// System prompt, then the most recent turns from the channel, or from
    /// every shared channel of the guild when shared chat is on.
    pub fn build_request(&self, message: &InboundMessage) -> CompletionRequest {
        let guild = self.registry.guild_config(&message.guild_id);
        let channel = self
            .registry
            .channel_config(&message.channel_id)
            .unwrap_or_default();

        let history = if channel.shared_chat {
            let channels = self.registry.shared_channels(&message.guild_id);
            self.store.guild_history(&channels, self.context_limit)
        } else {
            self.store
                .history(&message.channel_id, self.context_limit)
                .unwrap_or_default()
        };

        let mut system = guild.system_prompt.clone();
        if channel.shared_chat {
            system.push_str(prompts::SHARED_CONTEXT_NOTE);
        }
        system.push_str(&prompts::current_author(&message.author_name, &message.author_id));
        if !message.mentions.is_empty() {
            system.push_str(&prompts::entity_context(&message.mentions));
        }
        if let Some(quoted) = &message.reply_to {
            system.push_str(&prompts::replying_to(&quoted.author_name, &quoted.content));
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(PromptMessage::system(system));
        messages.extend(history.iter().map(|turn| match turn.role {
            Role::User => match &turn.author_name {
                Some(author) => PromptMessage::user(prompts::attributed(author, &turn.content)),
                None => PromptMessage::user(turn.content.clone()),
            },
            Role::Assistant => PromptMessage::assistant(turn.content.clone()),
        }));

        CompletionRequest {
            model: guild.chat_model,
            messages,
        }
    }

    pub async fn respond(&self, message: &InboundMessage, cancel: &CancellationToken) -> ReplyOutcome {
        let channel_id = message.channel_id.as_str();
        let request = self.build_request(message);

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                self.logs.info(logs::reply_cancelled(channel_id));
                return ReplyOutcome::Cancelled;
            }
            result = self.completion.complete(request) => result,
        };

        let reply = match result {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                self.logs.error(logs::completion_failed(
                    channel_id,
                    &CompletionError::EmptyResponse.to_string(),
                ));
                return ReplyOutcome::Failed;
            }
            Err(e) => {
                self.logs
                    .error(logs::completion_failed(channel_id, &e.to_string()));
                return ReplyOutcome::Failed;
            }
        };

        let chunks = self.connection.split(&reply);
        let mut posted = String::new();
        for (sent, chunk) in chunks.iter().enumerate() {
            if let Err(outcome) = self.post_with_retry(channel_id, chunk, cancel).await {
                // Keep history in line with what the channel shows.
                if sent > 0 {
                    self.store.append(channel_id, Message::assistant(posted));
                    self.logs
                        .warn(logs::reply_partial(channel_id, sent, chunks.len()));
                }
                return outcome;
            }
            posted.push_str(chunk);
        }

        self.store.append(channel_id, Message::assistant(reply.clone()));
        self.logs
            .info(logs::reply_posted(channel_id, reply.chars().count()));
        ReplyOutcome::Posted
    }

    async fn post_with_retry(
        &self,
        channel_id: &str,
        chunk: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ReplyOutcome> {
        let max = self.post_retry.max_retries();
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                self.logs.info(logs::reply_cancelled(channel_id));
                return Err(ReplyOutcome::Cancelled);
            }
            match self.connection.post(channel_id, chunk).await {
                Ok(()) => return Ok(()),
                Err(GatewayError::RateLimited { retry_after }) if attempt < max => {
                    attempt += 1;
                    let delay = retry_after.unwrap_or_else(|| self.post_retry.delay(attempt));
                    self.logs.warn(logs::post_rate_limited(
                        channel_id,
                        attempt,
                        max,
                        delay.as_millis(),
                    ));
                    if Backoff::wait(delay, cancel).await {
                        self.logs.info(logs::reply_cancelled(channel_id));
                        return Err(ReplyOutcome::Cancelled);
                    }
                }
                Err(e) => {
                    self.logs.error(logs::post_failed(channel_id, &e.to_string()));
                    return Err(ReplyOutcome::Failed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{
        ConfigPatch, GuildConfig, LogLevel, Mention, MentionKind, PromptRole, QuotedMessage,
    };
    use crate::testing::{FakeGateway, NoopSink, ScriptedCompletion, inbound};
    use std::time::Duration;

    struct Fixture {
        registry: Arc<ChannelRegistry>,
        store: Arc<MessageStore>,
        logs: Arc<LogBroadcaster>,
        completion: Arc<ScriptedCompletion>,
        gateway: Arc<FakeGateway>,
        connection: Arc<ConnectionManager>,
        orchestrator: ChatOrchestrator,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(ChannelRegistry::new(GuildConfig {
            chat_model: "test-model".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
        }));
        let store = Arc::new(MessageStore::new(50));
        let logs = Arc::new(LogBroadcaster::new(200, 200));
        let completion = ScriptedCompletion::new();
        let gateway = FakeGateway::new("token");
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5), 3);
        let connection = Arc::new(ConnectionManager::new(
            gateway.clone(),
            logs.clone(),
            backoff,
            2000,
            Duration::from_millis(200),
        ));
        connection.start("token", Arc::new(NoopSink)).await.unwrap();
        let orchestrator = ChatOrchestrator::new(
            registry.clone(),
            store.clone(),
            logs.clone(),
            completion.clone(),
            connection.clone(),
            3,
            backoff,
        );
        Fixture {
            registry,
            store,
            logs,
            completion,
            gateway,
            connection,
            orchestrator,
        }
    }

    fn listen_shared(listen: bool, shared: bool) -> ConfigPatch {
        ConfigPatch {
            is_listening: Some(listen),
            shared_chat: Some(shared),
            listen_mode: None,
        }
    }

    fn record(f: &Fixture, msg: &InboundMessage) {
        f.registry.ensure_channel(&msg.guild_id, &msg.channel_id).unwrap();
        f.store
            .append(&msg.channel_id, Message::user(&msg.author_name, &msg.content));
    }

    #[tokio::test]
    async fn test_request_has_prompt_author_block_and_bounded_history() {
        let f = fixture().await;
        f.registry.set_system_prompt("g", "Be terse.");
        for i in 0..5 {
            record(&f, &inbound("g", "c", "alice", &format!("m{i}")));
        }
        let request = f.orchestrator.build_request(&inbound("g", "c", "alice", "m4"));

        assert_eq!(request.model, "test-model");
        assert_eq!(request.messages.len(), 4);
        let system = &request.messages[0];
        assert_eq!(system.role, PromptRole::System);
        assert!(system.content.starts_with("Be terse."));
        assert!(system.content.contains("The user speaking to you now is: alice"));
        assert_eq!(request.messages[1].content, "[alice]: m2");
        assert_eq!(request.messages[3].content, "[alice]: m4");
    }

    #[tokio::test]
    async fn test_shared_chat_spans_channels() {
        let f = fixture().await;
        f.registry.update_config("g", "a", &listen_shared(false, true)).unwrap();
        f.registry.update_config("g", "b", &listen_shared(true, true)).unwrap();
        record(&f, &inbound("g", "a", "alice", "the password is swordfish"));
        let question = inbound("g", "b", "bob", "what is the password?");
        record(&f, &question);

        assert_eq!(f.orchestrator.respond(&question, &CancellationToken::new()).await, ReplyOutcome::Posted);
        let request = &f.completion.requests()[0];
        let texts: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert!(texts.contains(&"[alice]: the password is swordfish"));
        assert!(texts.contains(&"[bob]: what is the password?"));
    }

    #[tokio::test]
    async fn test_isolated_channel_does_not_see_neighbours() {
        let f = fixture().await;
        f.registry.update_config("g", "a", &listen_shared(true, false)).unwrap();
        record(&f, &inbound("g", "b", "alice", "secret"));
        let request = f.orchestrator.build_request(&inbound("g", "a", "bob", "hi"));
        assert!(request.messages.iter().all(|m| !m.content.contains("secret")));
    }

    #[tokio::test]
    async fn test_success_posts_and_records_assistant_turn() {
        let f = fixture().await;
        f.completion.push(Ok("Hello there!".to_string()));
        let msg = inbound("g", "c", "alice", "hi");
        record(&f, &msg);

        assert_eq!(f.orchestrator.respond(&msg, &CancellationToken::new()).await, ReplyOutcome::Posted);
        let posts = f.gateway.session(0).unwrap().posts();
        assert_eq!(posts, vec![("c".to_string(), "Hello there!".to_string())]);
        let history = f.store.history("c", 10).unwrap();
        assert_eq!(history.last().unwrap().role, Role::Assistant);
        assert_eq!(history.last().unwrap().content, "Hello there!");
    }

    #[tokio::test]
    async fn test_completion_failure_posts_nothing() {
        let f = fixture().await;
        f.completion.push(Err(CompletionError::Api {
            status: 500,
            message: "boom".to_string(),
        }));
        let msg = inbound("g", "c", "alice", "hi");
        record(&f, &msg);

        assert_eq!(f.orchestrator.respond(&msg, &CancellationToken::new()).await, ReplyOutcome::Failed);
        assert!(f.gateway.session(0).unwrap().posts().is_empty());
        assert!(f.store.history("c", 10).unwrap().iter().all(|m| m.role == Role::User));
        assert!(f.logs.snapshot().iter().any(|e| e.level == LogLevel::Error));
        assert!(f.connection.is_running());
    }

    #[tokio::test]
    async fn test_blank_completion_is_a_failure() {
        let f = fixture().await;
        f.completion.push(Ok("   \n".to_string()));
        let msg = inbound("g", "c", "alice", "hi");
        assert_eq!(f.orchestrator.respond(&msg, &CancellationToken::new()).await, ReplyOutcome::Failed);
        assert!(f.gateway.session(0).unwrap().posts().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_post_is_retried() {
        let f = fixture().await;
        f.gateway.session(0).unwrap().rate_limit_next(2);
        let msg = inbound("g", "c", "alice", "hi");

        assert_eq!(f.orchestrator.respond(&msg, &CancellationToken::new()).await, ReplyOutcome::Posted);
        assert_eq!(f.gateway.session(0).unwrap().posts().len(), 1);
        let warnings = f
            .logs
            .snapshot()
            .iter()
            .filter(|e| e.level == LogLevel::Warn)
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_records_nothing() {
        let f = fixture().await;
        f.gateway.session(0).unwrap().rate_limit_next(10);
        let msg = inbound("g", "c", "alice", "hi");
        record(&f, &msg);

        assert_eq!(f.orchestrator.respond(&msg, &CancellationToken::new()).await, ReplyOutcome::Failed);
        assert_eq!(f.store.history("c", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_post_records_what_was_sent() {
        let f = fixture().await;
        let first = "a".repeat(1990);
        let reply = format!("{first}\n{}\n{}", "b".repeat(1990), "c".repeat(10));
        f.completion.push(Ok(reply));
        f.gateway.session(0).unwrap().reject_after(1);
        let msg = inbound("g", "c", "alice", "write a lot");
        record(&f, &msg);

        assert_eq!(f.orchestrator.respond(&msg, &CancellationToken::new()).await, ReplyOutcome::Failed);
        assert_eq!(f.gateway.session(0).unwrap().posts().len(), 1);
        let history = f.store.history("c", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, format!("{first}\n"));
        assert!(f
            .logs
            .snapshot()
            .iter()
            .any(|e| e.level == LogLevel::Warn && e.message.contains("1 of 3 parts")));
    }

    #[tokio::test]
    async fn test_first_chunk_failure_records_nothing() {
        let f = fixture().await;
        f.gateway.session(0).unwrap().reject_after(0);
        let msg = inbound("g", "c", "alice", "hi");
        record(&f, &msg);

        assert_eq!(f.orchestrator.respond(&msg, &CancellationToken::new()).await, ReplyOutcome::Failed);
        assert_eq!(f.store.history("c", 10).unwrap().len(), 1);
        assert!(f.logs.snapshot().iter().all(|e| !e.message.contains("cut short")));
    }

    #[tokio::test]
    async fn test_request_carries_mentions_and_quoted_message() {
        let f = fixture().await;
        let mut msg = inbound("g", "c", "alice", "what did <@2> mean in <#7>?");
        msg.mentions = vec![
            Mention {
                kind: MentionKind::User,
                id: "2".to_string(),
                name: "bob".to_string(),
            },
            Mention {
                kind: MentionKind::Channel,
                id: "7".to_string(),
                name: "general".to_string(),
            },
        ];
        msg.reply_to = Some(QuotedMessage {
            author_name: "bob".to_string(),
            content: "line one\nline two".to_string(),
        });
        let system = f.orchestrator.build_request(&msg).messages[0].content.clone();

        assert!(system.contains("[SYSTEM: ENTITY CONTEXT]"));
        assert!(system.contains("- @bob: <@2>"));
        assert!(system.contains("- #general: <#7>"));
        assert!(system.contains("User is replying to message by @bob:\n\"line one line two\""));
    }

    #[tokio::test]
    async fn test_plain_message_has_no_context_blocks() {
        let f = fixture().await;
        let system = f.orchestrator.build_request(&inbound("g", "c", "alice", "hi")).messages[0]
            .content
            .clone();
        assert!(!system.contains("ENTITY CONTEXT"));
        assert!(!system.contains("REPLYING TO"));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_on_model() {
        let f = fixture().await;
        f.completion.set_hang(true);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let msg = inbound("g", "c", "alice", "hi");
        assert_eq!(f.orchestrator.respond(&msg, &cancel).await, ReplyOutcome::Cancelled);
        assert!(f.gateway.session(0).unwrap().posts().is_empty());
    }
}
