//! # Message Store
//!
//! Bounded per-channel conversation history. Each channel owns a partition
//! behind its own lock so work on different channels never contends; the outer
//! map is only write-locked when a channel is seen for the first time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::domain::error::StoreError;
use crate::domain::types::{ChannelId, Message};

#[derive(Debug, Default)]
struct Partition {
    /// Arrival sequence number alongside each message, used to merge channels.
    messages: VecDeque<(u64, Message)>,
    /// Messages ever appended, including evicted and cleared ones.
    received: u64,
}

/// Per-channel message counts reported in stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCounts {
    pub retained: usize,
    pub received: u64,
}

pub struct MessageStore {
    capacity: usize,
    partitions: RwLock<HashMap<ChannelId, Arc<Mutex<Partition>>>>,
    sequence: AtomicU64,
}

impl MessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            partitions: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn partition(&self, channel_id: &str) -> Option<Arc<Mutex<Partition>>> {
        self.partitions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(channel_id)
            .cloned()
    }

    fn partition_or_create(&self, channel_id: &str) -> Arc<Mutex<Partition>> {
        if let Some(partition) = self.partition(channel_id) {
            return partition;
        }
        self.partitions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(channel_id.to_string())
            .or_default()
            .clone()
    }

    /// Records a message, evicting the oldest one when the channel is full.
    pub fn append(&self, channel_id: &str, message: Message) {
        let partition = self.partition_or_create(channel_id);
        let mut guard = partition.lock().unwrap_or_else(|p| p.into_inner());
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        if guard.messages.len() >= self.capacity {
            guard.messages.pop_front();
        }
        guard.messages.push_back((seq, message));
        guard.received += 1;
    }

    /// The most recent `limit` messages of a channel, oldest first.
    pub fn history(&self, channel_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let partition = self
            .partition(channel_id)
            .ok_or_else(|| StoreError::ChannelNotFound(channel_id.to_string()))?;
        let guard = partition.lock().unwrap_or_else(|p| p.into_inner());
        let skip = guard.messages.len().saturating_sub(limit);
        Ok(guard
            .messages
            .iter()
            .skip(skip)
            .map(|(_, m)| m.clone())
            .collect())
    }

    /// The most recent `limit` messages across several channels, merged in arrival order.
    /// Channels that never received a message contribute nothing.
    pub fn guild_history(&self, channel_ids: &[ChannelId], limit: usize) -> Vec<Message> {
        let mut merged: Vec<(u64, Message)> = Vec::new();
        for channel_id in channel_ids {
            if let Some(partition) = self.partition(channel_id) {
                let guard = partition.lock().unwrap_or_else(|p| p.into_inner());
                let skip = guard.messages.len().saturating_sub(limit);
                merged.extend(guard.messages.iter().skip(skip).cloned());
            }
        }
        merged.sort_by_key(|(seq, _)| *seq);
        let skip = merged.len().saturating_sub(limit);
        merged.into_iter().skip(skip).map(|(_, m)| m).collect()
    }

    /// Drops all retained messages of a channel. Idempotent.
    pub fn clear(&self, channel_id: &str) {
        if let Some(partition) = self.partition(channel_id) {
            partition
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .messages
                .clear();
        }
    }

    pub fn clear_guild(&self, channel_ids: &[ChannelId]) {
        for channel_id in channel_ids {
            self.clear(channel_id);
        }
    }

    pub fn counts(&self, channel_id: &str) -> ChannelCounts {
        self.partition(channel_id)
            .map(|partition| {
                let guard = partition.lock().unwrap_or_else(|p| p.into_inner());
                ChannelCounts {
                    retained: guard.messages.len(),
                    received: guard.received,
                }
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.partition(channel_id).is_some()
    }
}
