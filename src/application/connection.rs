//! # Connection Manager
//!
//! Owns the single gateway session and its lifecycle:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!                          ^  |
//!                          |  v
//!                      Reconnecting -> Crashed -> Stopped   (reconnect gave up)
//! ```
//!
//! While running, a supervisor task drains gateway events. Disconnects are
//! handled in place with exponential backoff; the state is `Reconnecting`
//! until a new session is up, so `running` never reports a missing session.
//! Every other event is handed to
//! an [`EventSink`] on its own task, tracked so `stop` can wait for in-flight
//! work before tearing the session down.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::application::backoff::Backoff;
use crate::application::logging::LogBroadcaster;
use crate::application::utils::split_message;
use crate::domain::error::{GatewayError, ServiceError};
use crate::domain::traits::{Gateway, GatewaySession};
use crate::domain::types::GatewayEvent;
use crate::strings::logs;

const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Reconnecting,
    Stopping,
    Crashed,
}

/// Per-event context handed to the sink.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub bot_user_id: String,
    /// Fires when the session is stopped or crashes.
    pub cancel: CancellationToken,
}

/// Receives every gateway event except lifecycle ones.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, event: GatewayEvent, ctx: DispatchContext);
}

struct RunHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    supervisor: JoinHandle<()>,
}

enum ConnectFailure {
    Auth(String),
    Failed(String),
    Cancelled,
}

pub struct ConnectionManager {
    gateway: Arc<dyn Gateway>,
    logs: Arc<LogBroadcaster>,
    reconnect: Backoff,
    chunk_size: usize,
    shutdown_grace: Duration,
    state: watch::Sender<LifecycleState>,
    session: RwLock<Option<Arc<dyn GatewaySession>>>,
    run: Mutex<Option<RunHandle>>,
}

impl ConnectionManager {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        logs: Arc<LogBroadcaster>,
        reconnect: Backoff,
        chunk_size: usize,
        shutdown_grace: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        Self {
            gateway,
            logs,
            reconnect,
            chunk_size: chunk_size.max(1),
            shutdown_grace,
            state,
            session: RwLock::new(None),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn bot_user_id(&self) -> Option<String> {
        self.current_session().map(|s| s.bot_user_id())
    }

    /// Atomically moves `from -> to`. Returns `false` if the state was not `from`.
    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.transition_any(&[from], to)
    }

    fn transition_any(&self, from: &[LifecycleState], to: LifecycleState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn current_session(&self) -> Option<Arc<dyn GatewaySession>> {
        self.session
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn set_session(&self, session: Option<Arc<dyn GatewaySession>>) -> Option<Arc<dyn GatewaySession>> {
        let mut guard = self.session.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *guard, session)
    }

    /// Connects and starts dispatching events to `sink`.
    pub async fn start(self: &Arc<Self>, token: &str, sink: Arc<dyn EventSink>) -> Result<(), ServiceError> {
        if !self.transition(LifecycleState::Stopped, LifecycleState::Starting) {
            self.logs.warn(logs::ALREADY_RUNNING);
            return Err(ServiceError::AlreadyRunning);
        }

        self.logs.info(logs::SEPARATOR);
        self.logs.info(logs::STARTING);
        self.logs.info(logs::SEPARATOR);
        self.logs.info(logs::VALIDATING_TOKEN);
        self.logs.info(logs::CONNECTING);

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);

        let session = match self.connect_with_retry(token, &tx, &cancel).await {
            Ok(session) => session,
            Err(failure) => {
                self.state.send_replace(LifecycleState::Stopped);
                return Err(match failure {
                    ConnectFailure::Auth(msg) => {
                        self.logs.error(logs::auth_failed(&msg));
                        ServiceError::Auth(msg)
                    }
                    ConnectFailure::Failed(msg) => {
                        self.logs.error(logs::connect_failed(&msg));
                        ServiceError::Network(msg)
                    }
                    ConnectFailure::Cancelled => ServiceError::NotRunning,
                });
            }
        };

        self.set_session(Some(session));
        let tracker = TaskTracker::new();
        {
            let mut run = self.run.lock().await;
            let supervisor = tokio::spawn(self.clone().supervise(
                token.to_string(),
                tx,
                rx,
                sink,
                cancel.clone(),
                tracker.clone(),
            ));
            *run = Some(RunHandle {
                cancel,
                tracker,
                supervisor,
            });
            self.state.send_replace(LifecycleState::Running);
        }

        self.logs.success(logs::CONNECTED);
        self.logs.info(logs::LISTENING);
        self.logs.info(logs::SEPARATOR);
        Ok(())
    }

    /// Cancels in-flight work, waits for it to settle and disconnects.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let mut state_rx = self.state.subscribe();
        let _ = state_rx
            .wait_for(|s| *s != LifecycleState::Starting)
            .await;

        if !self.transition_any(
            &[LifecycleState::Running, LifecycleState::Reconnecting],
            LifecycleState::Stopping,
        ) {
            self.logs.warn(logs::NOT_RUNNING);
            return Err(ServiceError::NotRunning);
        }

        self.logs.info(logs::SEPARATOR);
        self.logs.info(logs::STOPPING);

        let handle = self.run.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.supervisor.await;
            self.drain(&handle.tracker).await;
        }

        self.logs.info(logs::DISCONNECTING);
        if let Some(session) = self.set_session(None) {
            session.disconnect().await;
        }
        self.state.send_replace(LifecycleState::Stopped);

        self.logs.success(logs::STOPPED);
        self.logs.info(logs::SEPARATOR);
        Ok(())
    }

    /// Posts `content`, split into platform-sized chunks sent in order.
    pub async fn post(&self, channel_id: &str, content: &str) -> Result<(), GatewayError> {
        let session = self.current_session().ok_or(GatewayError::NotConnected)?;
        for chunk in split_message(content, self.chunk_size) {
            session.post(channel_id, &chunk).await?;
        }
        Ok(())
    }

    pub fn split(&self, content: &str) -> Vec<String> {
        split_message(content, self.chunk_size)
    }

    async fn drain(&self, tracker: &TaskTracker) {
        tracker.close();
        if tokio::time::timeout(self.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            self.logs
                .warn(logs::shutdown_grace_elapsed(self.shutdown_grace.as_millis() as u64));
        }
    }

    async fn connect_with_retry(
        &self,
        token: &str,
        events: &mpsc::Sender<GatewayEvent>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn GatewaySession>, ConnectFailure> {
        let max = self.reconnect.max_retries();
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ConnectFailure::Cancelled);
            }
            match self.gateway.connect(token, events.clone()).await {
                Ok(session) => return Ok(session),
                Err(GatewayError::Auth(msg)) => return Err(ConnectFailure::Auth(msg)),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt > max {
                        return Err(ConnectFailure::Failed(format!(
                            "{}: {}",
                            logs::reconnect_exhausted(max),
                            e
                        )));
                    }
                    let delay = self.reconnect.delay(attempt);
                    self.logs.warn(logs::connect_retry(
                        attempt,
                        max,
                        delay.as_millis(),
                        &e.to_string(),
                    ));
                    if Backoff::wait(delay, cancel).await {
                        return Err(ConnectFailure::Cancelled);
                    }
                }
                Err(e) => return Err(ConnectFailure::Failed(e.to_string())),
            }
        }
    }

    async fn supervise(
        self: Arc<Self>,
        token: String,
        tx: mpsc::Sender<GatewayEvent>,
        mut rx: mpsc::Receiver<GatewayEvent>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) {
        let mut state_rx = self.state.subscribe();
        let _ = state_rx
            .wait_for(|s| *s != LifecycleState::Starting)
            .await;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                GatewayEvent::Ready { bot_name, .. } => {
                    self.logs.success(logs::ready(&bot_name));
                }
                GatewayEvent::Disconnected { reason } => {
                    if cancel.is_cancelled()
                        || !self.transition(LifecycleState::Running, LifecycleState::Reconnecting)
                    {
                        break;
                    }
                    self.logs.warn(logs::disconnected(&reason));
                    if let Some(old) = self.set_session(None) {
                        old.disconnect().await;
                    }
                    match self.connect_with_retry(&token, &tx, &cancel).await {
                        Ok(session) => {
                            // A concurrent stop owns teardown of this session.
                            self.set_session(Some(session));
                            if !self.transition(LifecycleState::Reconnecting, LifecycleState::Running) {
                                break;
                            }
                            self.logs.success(logs::RECONNECTED);
                        }
                        Err(ConnectFailure::Cancelled) => break,
                        Err(ConnectFailure::Auth(msg)) | Err(ConnectFailure::Failed(msg)) => {
                            self.crash(&msg, &cancel, &tracker).await;
                            return;
                        }
                    }
                }
                event => {
                    let ctx = DispatchContext {
                        bot_user_id: self.bot_user_id().unwrap_or_default(),
                        cancel: cancel.child_token(),
                    };
                    let sink = sink.clone();
                    tracker.spawn(async move { sink.handle(event, ctx).await });
                }
            }
        }
        debug!("Gateway supervisor exited");
    }

    /// Gives up on the session. The persisted intent is not touched here.
    async fn crash(&self, reason: &str, cancel: &CancellationToken, tracker: &TaskTracker) {
        if !self.transition(LifecycleState::Reconnecting, LifecycleState::Crashed) {
            return;
        }
        self.logs.error(logs::crashed(reason));
        cancel.cancel();
        self.drain(tracker).await;
        if let Some(session) = self.set_session(None) {
            session.disconnect().await;
        }
        // Our own JoinHandle lives in here; dropping it detaches this task.
        self.run.lock().await.take();
        self.state.send_replace(LifecycleState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{InboundMessage, LogLevel};
    use crate::testing::{FakeGateway, eventually};

    #[derive(Default)]
    struct RecordingSink {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn handle(&self, event: GatewayEvent, ctx: DispatchContext) {
            if let GatewayEvent::Message(m) = event {
                self.seen
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", ctx.bot_user_id, m.content));
            }
        }
    }

    fn manager(gateway: Arc<FakeGateway>) -> (Arc<ConnectionManager>, Arc<LogBroadcaster>) {
        let logs = Arc::new(LogBroadcaster::new(200, 200));
        let manager = Arc::new(ConnectionManager::new(
            gateway,
            logs.clone(),
            Backoff::new(Duration::from_millis(1), Duration::from_millis(5), 3),
            2000,
            Duration::from_millis(500),
        ));
        (manager, logs)
    }

    fn sink() -> Arc<RecordingSink> {
        Arc::new(RecordingSink::default())
    }

    #[tokio::test]
    async fn test_start_stop_start() {
        let gateway = FakeGateway::new("good");
        let (cm, _) = manager(gateway.clone());

        cm.start("good", sink()).await.unwrap();
        assert_eq!(cm.state(), LifecycleState::Running);
        cm.stop().await.unwrap();
        assert_eq!(cm.state(), LifecycleState::Stopped);
        assert!(gateway.session(0).unwrap().is_disconnected());

        cm.start("good", sink()).await.unwrap();
        assert!(cm.is_running());
        assert_eq!(gateway.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_without_side_effects() {
        let gateway = FakeGateway::new("good");
        let (cm, _) = manager(gateway.clone());
        cm.start("good", sink()).await.unwrap();

        assert_eq!(cm.start("good", sink()).await, Err(ServiceError::AlreadyRunning));
        assert_eq!(gateway.connect_count(), 1);
        assert!(!gateway.session(0).unwrap().is_disconnected());
        assert!(cm.is_running());
    }

    #[tokio::test]
    async fn test_concurrent_starts_open_one_session() {
        let gateway = FakeGateway::new("good");
        let (cm, _) = manager(gateway.clone());
        let (a, b) = tokio::join!(cm.start("good", sink()), cm.start("good", sink()));
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(gateway.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_token_is_auth_error() {
        let gateway = FakeGateway::new("good");
        let (cm, logs) = manager(gateway);
        let err = cm.start("bad", sink()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
        assert_eq!(cm.state(), LifecycleState::Stopped);
        assert!(logs.snapshot().iter().any(|e| e.level == LogLevel::Error));
    }

    #[tokio::test]
    async fn test_initial_network_failures_are_retried() {
        let gateway = FakeGateway::new("good");
        gateway.fail_next_connects(2);
        let (cm, logs) = manager(gateway.clone());
        cm.start("good", sink()).await.unwrap();
        assert_eq!(gateway.connect_count(), 3);
        let warnings = logs
            .snapshot()
            .iter()
            .filter(|e| e.level == LogLevel::Warn)
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test]
    async fn test_initial_connect_exhaustion_is_network_error() {
        let gateway = FakeGateway::new("good");
        gateway.set_refuse(true);
        let (cm, _) = manager(gateway.clone());
        let err = cm.start("good", sink()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Network(_)));
        assert_eq!(gateway.connect_count(), 4);
        assert_eq!(cm.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_not_running() {
        let (cm, _) = manager(FakeGateway::new("good"));
        assert_eq!(cm.stop().await, Err(ServiceError::NotRunning));
    }

    #[tokio::test]
    async fn test_duplicate_stop_has_no_side_effects() {
        let gateway = FakeGateway::new("good");
        let (cm, _) = manager(gateway);
        cm.start("good", sink()).await.unwrap();
        let (a, b) = tokio::join!(cm.stop(), cm.stop());
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(cm.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_events_reach_sink_with_bot_id() {
        let gateway = FakeGateway::new("good");
        let (cm, _) = manager(gateway.clone());
        let recorder = sink();
        cm.start("good", recorder.clone()).await.unwrap();

        gateway
            .inject(GatewayEvent::Message(InboundMessage {
                guild_id: "g".into(),
                channel_id: "c".into(),
                author_id: "u".into(),
                author_name: "u".into(),
                content: "ping".into(),
                ..Default::default()
            }))
            .await;

        assert!(eventually(|| recorder.seen.lock().unwrap().len() == 1).await);
        assert_eq!(recorder.seen.lock().unwrap()[0], "bot:ping");
    }

    #[tokio::test]
    async fn test_disconnect_reconnects() {
        let gateway = FakeGateway::new("good");
        let (cm, logs) = manager(gateway.clone());
        cm.start("good", sink()).await.unwrap();
        gateway.fail_next_connects(1);
        gateway.drop_connection("socket reset").await;

        assert!(eventually(|| gateway.connect_count() == 3).await);
        assert!(
            eventually(|| logs
                .snapshot()
                .iter()
                .any(|e| e.message == crate::strings::logs::RECONNECTED))
            .await
        );
        assert!(cm.is_running());
        cm.post("c", "after reconnect").await.unwrap();
        assert_eq!(gateway.session(1).unwrap().posts().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_crashes_to_stopped() {
        let gateway = FakeGateway::new("good");
        let (cm, logs) = manager(gateway.clone());
        cm.start("good", sink()).await.unwrap();
        gateway.set_refuse(true);
        gateway.drop_connection("gone").await;

        assert!(eventually(|| cm.state() == LifecycleState::Stopped).await);
        assert!(!cm.is_running());
        assert!(
            logs.snapshot()
                .iter()
                .any(|e| e.level == LogLevel::Error && e.message.contains("crashed"))
        );
        assert_eq!(cm.post("c", "x").await, Err(GatewayError::NotConnected));

        gateway.set_refuse(false);
        cm.start("good", sink()).await.unwrap();
        assert!(cm.is_running());
    }

    fn slow_manager(gateway: Arc<FakeGateway>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            gateway,
            Arc::new(LogBroadcaster::new(200, 200)),
            Backoff::new(Duration::from_millis(200), Duration::from_millis(200), 3),
            2000,
            Duration::from_millis(500),
        ))
    }

    #[tokio::test]
    async fn test_not_running_while_reconnect_is_pending() {
        let gateway = FakeGateway::new("good");
        let cm = slow_manager(gateway.clone());
        cm.start("good", sink()).await.unwrap();
        gateway.set_refuse(true);
        gateway.drop_connection("socket reset").await;

        assert!(eventually(|| cm.state() == LifecycleState::Reconnecting).await);
        assert!(!cm.is_running());
        assert!(cm.bot_user_id().is_none());
        assert_eq!(cm.start("good", sink()).await, Err(ServiceError::AlreadyRunning));

        gateway.set_refuse(false);
        assert!(eventually(|| cm.is_running()).await);
        assert!(cm.bot_user_id().is_some());
    }

    #[tokio::test]
    async fn test_stop_during_reconnect() {
        let gateway = FakeGateway::new("good");
        let cm = slow_manager(gateway.clone());
        cm.start("good", sink()).await.unwrap();
        gateway.set_refuse(true);
        gateway.drop_connection("socket reset").await;
        assert!(eventually(|| cm.state() == LifecycleState::Reconnecting).await);

        let started = std::time::Instant::now();
        cm.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(cm.state(), LifecycleState::Stopped);
        gateway.set_refuse(false);
        cm.start("good", sink()).await.unwrap();
        assert!(cm.is_running());
    }

    #[tokio::test]
    async fn test_post_splits_long_content() {
        let gateway = FakeGateway::new("good");
        let (cm, _) = manager(gateway.clone());
        cm.start("good", sink()).await.unwrap();
        cm.post("c", &"word ".repeat(900)).await.unwrap();
        let posts = gateway.session(0).unwrap().posts();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|(_, text)| text.chars().count() <= 2000));
    }
}
