use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::platforms::{ModerationAdapter, PlatformError, PlatformResult};
use crate::types::ChatMessage;

/// An outbound call captured by [`DryRunConnection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    DeleteMessage { channel_id: String, message_id: String },
    BulkDelete { channel_id: String, message_ids: Vec<String>, accepted: bool },
    DirectMessage { user_id: String, text: String },
    Ban { guild_id: String, user_id: String, reason: String },
    FetchRecent { channel_id: String, author_id: String, limit: usize },
    ChannelMessage { channel_id: String, content: String },
}

/// Adapter that performs no network I/O. Every call is logged and recorded,
/// posted messages are kept so history fetches behave like a real channel.
pub struct DryRunConnection {
    calls: Mutex<Vec<AdapterCall>>,
    history: Mutex<Vec<ChatMessage>>,
    ban_failure: Mutex<Option<PlatformError>>,
    fail_bulk_delete: AtomicBool,
    dms_closed: AtomicBool,
    latency: Duration,
}

impl DryRunConnection {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            ban_failure: Mutex::new(None),
            fail_bulk_delete: AtomicBool::new(false),
            dms_closed: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    /// Delay every outbound call, like a real network round trip
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    /// Make the message visible to `fetch_recent_messages`
    pub async fn post(&self, message: &ChatMessage) {
        self.history.lock().await.push(message.clone());
    }

    /// Make subsequent bans fail with the given error (`None` restores success)
    pub async fn set_ban_failure(&self, failure: Option<PlatformError>) {
        *self.ban_failure.lock().await = failure;
    }

    pub fn set_bulk_delete_failing(&self, failing: bool) {
        self.fail_bulk_delete.store(failing, Ordering::SeqCst);
    }

    pub fn set_dms_closed(&self, closed: bool) {
        self.dms_closed.store(closed, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().await.clone()
    }

    /// IDs of every message removed so far, single or bulk
    pub async fn deleted_ids(&self) -> Vec<String> {
        let calls = self.calls.lock().await;
        let mut ids = Vec::new();
        for call in calls.iter() {
            match call {
                AdapterCall::DeleteMessage { message_id, .. } => ids.push(message_id.clone()),
                AdapterCall::BulkDelete { message_ids, accepted: true, .. } => ids.extend(message_ids.iter().cloned()),
                _ => {}
            }
        }
        ids
    }

    pub async fn bans(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                AdapterCall::Ban { guild_id, user_id, .. } => Some((guild_id.clone(), user_id.clone())),
                _ => None,
            })
            .collect()
    }

    /// Contents posted to the given channel, in order
    pub async fn channel_messages(&self, channel_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                AdapterCall::ChannelMessage { channel_id: c, content } if c == channel_id => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: AdapterCall) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.lock().await.push(call);
    }
}

impl Default for DryRunConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModerationAdapter for DryRunConnection {
    fn platform_name(&self) -> &str {
        "dry-run"
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()> {
        info!("[dry-run] delete message {} in #{}", message_id, channel_id);
        self.record(AdapterCall::DeleteMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
        })
        .await;
        self.history
            .lock()
            .await
            .retain(|m| !(m.channel_id == channel_id && m.message_id == message_id));
        Ok(())
    }

    async fn bulk_delete_messages(&self, channel_id: &str, message_ids: &[String]) -> PlatformResult<()> {
        let accepted = !self.fail_bulk_delete.load(Ordering::SeqCst);
        self.record(AdapterCall::BulkDelete {
            channel_id: channel_id.to_string(),
            message_ids: message_ids.to_vec(),
            accepted,
        })
        .await;

        if !accepted {
            return Err(PlatformError::Other("bulk delete rejected".to_string()));
        }

        info!("[dry-run] bulk delete {} messages in #{}", message_ids.len(), channel_id);
        self.history
            .lock()
            .await
            .retain(|m| !(m.channel_id == channel_id && message_ids.contains(&m.message_id)));
        Ok(())
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> PlatformResult<()> {
        if self.dms_closed.load(Ordering::SeqCst) {
            return Err(PlatformError::DirectMessagesClosed);
        }
        info!("[dry-run] DM to {}: {}", user_id, text);
        self.record(AdapterCall::DirectMessage {
            user_id: user_id.to_string(),
            text: text.to_string(),
        })
        .await;
        Ok(())
    }

    async fn ban_user(&self, guild_id: &str, user_id: &str, reason: &str) -> PlatformResult<()> {
        if let Some(failure) = self.ban_failure.lock().await.clone() {
            return Err(failure);
        }
        info!("[dry-run] ban {} from guild {}: {}", user_id, guild_id, reason);
        self.record(AdapterCall::Ban {
            guild_id: guild_id.to_string(),
            user_id: user_id.to_string(),
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        author_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> PlatformResult<Vec<ChatMessage>> {
        self.record(AdapterCall::FetchRecent {
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
            limit,
        })
        .await;

        let history = self.history.lock().await;
        Ok(history
            .iter()
            .rev()
            .filter(|m| m.channel_id == channel_id && m.author_id == author_id && m.timestamp >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn send_to_channel(&self, channel_id: &str, content: &str) -> PlatformResult<()> {
        info!("[dry-run] #{} <- {}", channel_id, content.replace('\n', " | "));
        self.record(AdapterCall::ChannelMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        })
        .await;
        Ok(())
    }
}
