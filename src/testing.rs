//! In-memory gateway and completion fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::application::connection::{DispatchContext, EventSink};
use crate::domain::config::{AppConfig, RetryConfig};
use crate::domain::error::{CompletionError, GatewayError};
use crate::domain::traits::{ChatCompletion, Gateway, GatewaySession};
use crate::domain::types::{CompletionRequest, GatewayEvent, InboundMessage};

pub const BOT_ID: &str = "bot";

#[derive(Default)]
struct GatewayState {
    failures_left: u32,
    refuse: bool,
    connects: u32,
    events: Option<mpsc::Sender<GatewayEvent>>,
    sessions: Vec<Arc<FakeSession>>,
}

/// Accepts one token; can be told to fail connects with network errors.
pub struct FakeGateway {
    valid_token: String,
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    pub fn new(valid_token: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_token: valid_token.to_string(),
            state: Mutex::new(GatewayState::default()),
        })
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().failures_left = n;
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    pub fn connect_count(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    /// The `n`th successfully opened session.
    pub fn session(&self, n: usize) -> Option<Arc<FakeSession>> {
        self.state.lock().unwrap().sessions.get(n).cloned()
    }

    pub fn latest_session(&self) -> Option<Arc<FakeSession>> {
        self.state.lock().unwrap().sessions.last().cloned()
    }

    pub async fn inject(&self, event: GatewayEvent) {
        let tx = self.state.lock().unwrap().events.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn drop_connection(&self, reason: &str) {
        self.inject(GatewayEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn connect(
        &self,
        token: &str,
        events: mpsc::Sender<GatewayEvent>,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if token != self.valid_token {
            return Err(GatewayError::Auth("401 Unauthorized".to_string()));
        }
        if state.refuse {
            return Err(GatewayError::Network("connection refused".to_string()));
        }
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(GatewayError::Network("connection reset".to_string()));
        }
        let session = Arc::new(FakeSession::default());
        state.sessions.push(session.clone());
        state.events = Some(events);
        Ok(session)
    }
}

#[derive(Default)]
pub struct FakeSession {
    posts: Mutex<Vec<(String, String)>>,
    rate_limit_next: AtomicU32,
    reject_after: Mutex<Option<usize>>,
    disconnected: AtomicBool,
}

impl FakeSession {
    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn rate_limit_next(&self, n: u32) {
        self.rate_limit_next.store(n, Ordering::SeqCst);
    }

    /// Posts after the first `n` accepted ones fail with a platform error.
    pub fn reject_after(&self, n: usize) {
        *self.reject_after.lock().unwrap() = Some(n);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewaySession for FakeSession {
    fn bot_user_id(&self) -> String {
        BOT_ID.to_string()
    }

    async fn post(&self, channel_id: &str, content: &str) -> Result<(), GatewayError> {
        if self.is_disconnected() {
            return Err(GatewayError::NotConnected);
        }
        let limited = self
            .rate_limit_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if limited {
            return Err(GatewayError::RateLimited { retry_after: None });
        }
        let mut posts = self.posts.lock().unwrap();
        if let Some(n) = *self.reject_after.lock().unwrap()
            && posts.len() >= n
        {
            return Err(GatewayError::Platform("Missing Permissions".to_string()));
        }
        posts.push((channel_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Returns queued results in order, then `"ok"`. Can be made to hang.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    hang: AtomicBool,
}

impl ScriptedCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Result<String, CompletionError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        self.requests.lock().unwrap().push(request);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }
}

pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn handle(&self, _event: GatewayEvent, _ctx: DispatchContext) {}
}

/// Polls `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn inbound(guild: &str, channel: &str, author: &str, content: &str) -> InboundMessage {
    InboundMessage {
        guild_id: guild.to_string(),
        channel_id: channel.to_string(),
        author_id: author.to_string(),
        author_name: author.to_string(),
        content: content.to_string(),
        ..Default::default()
    }
}

/// Defaults with millisecond retry delays.
pub fn test_config() -> AppConfig {
    let fast = RetryConfig {
        base_delay_ms: 1,
        max_delay_ms: 5,
        max_retries: 3,
    };
    let mut config = AppConfig::default();
    config.reconnect = fast.clone();
    config.post_retry = fast;
    config.engine.shutdown_grace_ms = 500;
    config
}
