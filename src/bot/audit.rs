// src/bot/audit.rs - Violation and ban records posted to operator channels

use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;

use crate::platforms::ModerationAdapter;
use crate::types::{BanFailure, ChatMessage, RuleKind};

const MAX_QUOTED_CONTENT: usize = 200;

/// Kind of ban record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanLogKind {
    Banned,
    AutoBanned,
    Failed(BanFailure),
}

impl BanLogKind {
    pub fn title(&self) -> &'static str {
        match self {
            BanLogKind::Banned => "User Banned",
            BanLogKind::AutoBanned => "User Auto-Banned",
            BanLogKind::Failed(BanFailure::MissingPermissions) => "Ban Failed - Missing Permissions",
            BanLogKind::Failed(BanFailure::Error(_)) => "Ban Failed - Error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BanLogEntry {
    pub kind: BanLogKind,
    pub guild_id: String,
    pub user_id: String,
    pub user_name: String,
    pub rule: RuleKind,
    pub reason: String,
}

/// Formats audit records and forwards them through the platform adapter.
/// Sending is best-effort: failures are logged and never reach the caller.
pub struct AuditEmitter {
    adapter: Arc<dyn ModerationAdapter>,
}

impl AuditEmitter {
    pub fn new(adapter: Arc<dyn ModerationAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn log_violation(
        &self,
        log_channel: Option<&str>,
        message: &ChatMessage,
        rule: RuleKind,
        details: &str,
        action_taken: &str,
    ) {
        let Some(channel) = log_channel else {
            debug!("No log channel for guild {}, skipping violation record", message.guild_id);
            return;
        };

        let content = format_violation(message, rule, details, action_taken);
        if let Err(e) = self.adapter.send_to_channel(channel, &content).await {
            warn!("Failed to post violation record to #{}: {}", channel, e);
        }
    }

    pub async fn log_ban(&self, ban_log_channel: Option<&str>, entry: &BanLogEntry) {
        let Some(channel) = ban_log_channel else {
            debug!("No ban log channel configured, skipping '{}' record", entry.kind.title());
            return;
        };

        let content = format_ban(entry);
        if let Err(e) = self.adapter.send_to_channel(channel, &content).await {
            warn!("Failed to post ban record to #{}: {}", channel, e);
        }
    }
}

fn format_violation(message: &ChatMessage, rule: RuleKind, details: &str, action_taken: &str) -> String {
    let mut quoted: String = message.content.chars().take(MAX_QUOTED_CONTENT).collect();
    if message.content.chars().count() > MAX_QUOTED_CONTENT {
        quoted.push_str("...");
    }

    format!(
        "**AutoMod Violation**\n\
         User: {} (<@{}>)\n\
         Channel: <#{}>\n\
         Rule: {}\n\
         Details: {}\n\
         Action: {}\n\
         Message: {}\n\
         Time: {}",
        message.display_author(),
        message.author_id,
        message.channel_id,
        rule,
        details,
        action_taken,
        quoted,
        Utc::now().to_rfc3339(),
    )
}

fn format_ban(entry: &BanLogEntry) -> String {
    let mut content = format!(
        "**{}**\n\
         User: {} (<@{}>)\n\
         Guild: {}\n\
         Rule: {}\n\
         Reason: {}",
        entry.kind.title(),
        entry.user_name,
        entry.user_id,
        entry.guild_id,
        entry.rule,
        entry.reason,
    );
    if let BanLogKind::Failed(BanFailure::Error(error)) = &entry.kind {
        content.push_str(&format!("\nError: {}", error));
    }
    content.push_str(&format!("\nTime: {}", Utc::now().to_rfc3339()));
    content
}
