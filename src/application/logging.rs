//! # Log Broadcaster
//!
//! The operator-facing log. Entries go into a bounded ring buffer for the pull
//! query and are published on a `broadcast` channel for live subscribers. A
//! subscriber that falls behind loses its oldest entries and is told how many
//! through `RecvError::Lagged`, so a stalled observer never slows the bot down.
//!
//! Every entry is also mirrored into `tracing` so it lands in the session log.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::domain::types::{LogEntry, LogLevel};

pub struct LogBroadcaster {
    capacity: usize,
    buffer: Mutex<VecDeque<LogEntry>>,
    tx: broadcast::Sender<LogEntry>,
}

impl LogBroadcaster {
    /// `queue_capacity` bounds how far each subscriber may lag behind.
    pub fn new(capacity: usize, queue_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(queue_capacity.max(1));
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            tx,
        }
    }

    /// Records an entry and publishes it. Never blocks on subscribers.
    pub fn emit(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info | LogLevel::Success => info!(target: "relaybot::ops", "{}", entry.message),
            LogLevel::Warn => warn!(target: "relaybot::ops", "{}", entry.message),
            LogLevel::Error => error!(target: "relaybot::ops", "{}", entry.message),
        }

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(|p| p.into_inner());
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }

        // No receivers is fine
        let _ = self.tx.send(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogEntry::new(LogLevel::Warn, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogEntry::new(LogLevel::Error, message));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(LogEntry::new(LogLevel::Success, message));
    }

    /// Buffer contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Empties the buffer. Entries already delivered to subscribers stay there.
    pub fn clear(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Entries emitted from now on. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

/// A subscription as a stream that skips over lag and ends once the
/// broadcaster is gone.
pub fn entries(rx: broadcast::Receiver<LogEntry>) -> impl Stream<Item = LogEntry> + Send + 'static {
    BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(entry) => Some(entry),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            debug!("Log subscriber lagged, {} entries dropped", skipped);
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn messages(entries: &[LogEntry]) -> Vec<String> {
        entries.iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn test_buffer_keeps_last_capacity_entries() {
        let logs = LogBroadcaster::new(3, 10);
        for i in 0..7 {
            logs.info(i.to_string());
        }
        assert_eq!(messages(&logs.snapshot()), vec!["4", "5", "6"]);
    }

    #[test]
    fn test_clear_does_not_touch_subscribers() {
        let logs = LogBroadcaster::new(10, 10);
        let mut rx = logs.subscribe();
        logs.warn("first");
        logs.clear();
        assert!(logs.snapshot().is_empty());
        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.message, "first");
        assert_eq!(entry.level, LogLevel::Warn);
    }

    #[test]
    fn test_slow_subscriber_drops_oldest() {
        let logs = LogBroadcaster::new(100, 2);
        let mut rx = logs.subscribe();
        for i in 0..5 {
            logs.info(i.to_string());
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Lagged(3)));
        assert_eq!(rx.try_recv().unwrap().message, "3");
        assert_eq!(rx.try_recv().unwrap().message, "4");
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(logs.snapshot().len(), 5);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let logs = LogBroadcaster::new(10, 10);
        let rx = logs.subscribe();
        drop(rx);
        logs.error("after");
        assert_eq!(messages(&logs.snapshot()), vec!["after"]);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_emit() {
        let logs = Arc::new(LogBroadcaster::new(10, 10));
        let mut rx = logs.subscribe();
        let emitter = logs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.success("ready");
        });
        let entry = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.level, LogLevel::Success);
    }

    #[tokio::test]
    async fn test_stream_skips_lag_and_ends_with_broadcaster() {
        let logs = LogBroadcaster::new(10, 2);
        let rx = logs.subscribe();
        for name in ["a", "b", "c", "d"] {
            logs.info(name);
        }
        drop(logs);
        let collected: Vec<LogEntry> = entries(rx).collect().await;
        assert_eq!(messages(&collected), vec!["c", "d"]);
    }
}
