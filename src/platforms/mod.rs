use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::ChatMessage;

pub mod dry_run;

/// Failure reported by the chat platform for an outbound call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("missing permissions")]
    MissingPermissions,
    #[error("recipient does not accept direct messages")]
    DirectMessagesClosed,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Outbound operations the moderation engine needs from a chat platform
#[async_trait]
pub trait ModerationAdapter: Send + Sync {
    /// Get the platform identifier (e.g., "discord", "dry-run")
    fn platform_name(&self) -> &str;

    /// Delete a single message
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()>;

    /// Delete several messages in one request. May fail partially.
    async fn bulk_delete_messages(&self, channel_id: &str, message_ids: &[String]) -> PlatformResult<()>;

    /// Send a direct message to a user
    async fn send_direct_message(&self, user_id: &str, text: &str) -> PlatformResult<()>;

    /// Ban a user from a guild
    async fn ban_user(&self, guild_id: &str, user_id: &str, reason: &str) -> PlatformResult<()>;

    /// Fetch up to `limit` of an author's messages in a channel posted at or after `since`
    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        author_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> PlatformResult<Vec<ChatMessage>>;

    /// Post a message into a channel (audit and ban logs)
    async fn send_to_channel(&self, channel_id: &str, content: &str) -> PlatformResult<()>;
}
