// src/bot/spam_window.rs - Per-channel burst tracking for the spam rule

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::platforms::ModerationAdapter;
use crate::types::{ChatMessage, WindowEntry};

/// Messages kept per channel (any author), oldest evicted first
pub const WINDOW_CAPACITY: usize = 10;

/// Longest spam window a guild may configure
pub const MAX_WINDOW_SECONDS: u64 = 86_400;

/// `None` when the window does not fit a chrono duration
pub fn window_duration(window_seconds: u64) -> Option<Duration> {
    i64::try_from(window_seconds).ok().and_then(Duration::try_seconds)
}

/// Storage for recent channel activity. Not durable: the default
/// implementation starts empty on every process start.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Append an entry to the channel's window, evicting past capacity
    async fn record(&self, channel_id: &str, entry: WindowEntry);

    /// Entries by `author_id` no older than `window` relative to `now`
    async fn count_recent(&self, channel_id: &str, author_id: &str, window: Duration, now: DateTime<Utc>) -> usize;

    /// Count the author's recent entries and, when the count reaches
    /// `threshold`, remove all of the author's entries in the same step.
    /// Returns the count and the removed entries; only one caller can
    /// claim a given burst.
    async fn claim_burst(
        &self,
        channel_id: &str,
        author_id: &str,
        window: Duration,
        threshold: usize,
        now: DateTime<Utc>,
    ) -> Option<(usize, Vec<WindowEntry>)>;

    /// Snapshot of a channel's window in insertion order
    async fn entries(&self, channel_id: &str) -> Vec<WindowEntry>;

    async fn clear(&self);
}

pub struct InMemoryWindowStore {
    channels: Mutex<HashMap<String, VecDeque<WindowEntry>>>,
    capacity: usize,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn recent(entries: &VecDeque<WindowEntry>, author_id: &str, window: Duration, now: DateTime<Utc>) -> usize {
        entries
            .iter()
            .filter(|e| e.author_id == author_id && now.signed_duration_since(e.timestamp) <= window)
            .count()
    }
}

impl Default for InMemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn record(&self, channel_id: &str, entry: WindowEntry) {
        let mut channels = self.channels.lock().await;
        let window = channels
            .entry(channel_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        window.push_back(entry);
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    async fn count_recent(&self, channel_id: &str, author_id: &str, window: Duration, now: DateTime<Utc>) -> usize {
        let channels = self.channels.lock().await;
        channels
            .get(channel_id)
            .map(|entries| Self::recent(entries, author_id, window, now))
            .unwrap_or(0)
    }

    async fn claim_burst(
        &self,
        channel_id: &str,
        author_id: &str,
        window: Duration,
        threshold: usize,
        now: DateTime<Utc>,
    ) -> Option<(usize, Vec<WindowEntry>)> {
        let mut channels = self.channels.lock().await;
        let entries = channels.get_mut(channel_id)?;

        let count = Self::recent(entries, author_id, window, now);
        if count == 0 || count < threshold {
            return None;
        }

        let (removed, kept): (VecDeque<_>, VecDeque<_>) = entries.drain(..).partition(|e| e.author_id == author_id);
        *entries = kept;
        Some((count, removed.into_iter().collect()))
    }

    async fn entries(&self, channel_id: &str) -> Vec<WindowEntry> {
        self.channels
            .lock()
            .await
            .get(channel_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn clear(&self) {
        self.channels.lock().await.clear();
        info!("Cleared all spam windows");
    }
}

/// Summary of one burst cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepResult {
    pub message_ids: Vec<String>,
    pub bulk_succeeded: bool,
}

/// Spam detection on top of a [`WindowStore`]
pub struct SpamTracker {
    store: Arc<dyn WindowStore>,
    /// Entries taken out of the window by a claimed burst, keyed by the
    /// triggering message, until the sweep deletes them
    claimed: Mutex<HashMap<String, Vec<WindowEntry>>>,
}

impl SpamTracker {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self {
            store,
            claimed: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    pub async fn observe(&self, message: &ChatMessage) {
        self.store.record(&message.channel_id, WindowEntry::from(message)).await;
    }

    /// Messages by this author in the tracked window, the current one included
    pub async fn recent_count(&self, message: &ChatMessage, window_seconds: u64) -> usize {
        let Some(window) = window_duration(window_seconds) else {
            warn!("Spam window of {}s is out of range, ignoring", window_seconds);
            return 0;
        };
        self.store
            .count_recent(&message.channel_id, &message.author_id, window, message.timestamp)
            .await
    }

    /// Returns the burst size when this message pushes the author to
    /// `threshold`. The author's tracked entries leave the window at once,
    /// so concurrent messages of the same burst cannot fire again.
    pub async fn claim_burst(&self, message: &ChatMessage, window_seconds: u64, threshold: usize) -> Option<usize> {
        let Some(window) = window_duration(window_seconds) else {
            warn!("Spam window of {}s is out of range, ignoring", window_seconds);
            return None;
        };

        let (count, removed) = self
            .store
            .claim_burst(&message.channel_id, &message.author_id, window, threshold, message.timestamp)
            .await?;

        self.claimed.lock().await.insert(claim_key(message), removed);
        Some(count)
    }

    /// Delete every message of a claimed burst, not only the tracked ones
    pub async fn sweep_burst(
        &self,
        adapter: &dyn ModerationAdapter,
        message: &ChatMessage,
        window_seconds: u64,
        fetch_limit: usize,
    ) -> SweepResult {
        let since = window_duration(window_seconds)
            .and_then(|window| message.timestamp.checked_sub_signed(window))
            .unwrap_or(message.timestamp);
        let mut ids: Vec<String> = Vec::new();

        match adapter
            .fetch_recent_messages(&message.channel_id, &message.author_id, since, fetch_limit)
            .await
        {
            Ok(history) => ids.extend(history.into_iter().map(|m| m.message_id)),
            Err(e) => warn!(
                "Failed to fetch history of {} in #{}, deleting tracked messages only: {}",
                message.author_id, message.channel_id, e
            ),
        }

        let tracked = self.claimed.lock().await.remove(&claim_key(message)).unwrap_or_default();
        ids.extend(tracked.into_iter().filter(|e| e.timestamp >= since).map(|e| e.message_id));
        ids.push(message.message_id.clone());

        let mut unique = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        let bulk_succeeded = self.delete_all(adapter, &message.channel_id, &unique).await;
        info!(
            "Removed spam burst of {} messages from {} in #{}",
            unique.len(),
            message.author_id,
            message.channel_id
        );

        SweepResult {
            message_ids: unique,
            bulk_succeeded,
        }
    }

    async fn delete_all(&self, adapter: &dyn ModerationAdapter, channel_id: &str, ids: &[String]) -> bool {
        if ids.len() > 1 {
            match adapter.bulk_delete_messages(channel_id, ids).await {
                Ok(()) => return true,
                Err(e) => warn!("Bulk delete in #{} failed, deleting one by one: {}", channel_id, e),
            }
        }

        // best-effort
        for id in ids {
            if let Err(e) = adapter.delete_message(channel_id, id).await {
                debug!("Could not delete message {} in #{}: {}", id, channel_id, e);
            }
        }
        false
    }
}

fn claim_key(message: &ChatMessage) -> String {
    format!("{}:{}", message.channel_id, message.message_id)
}
