// src/types/mod.rs - Core types shared by the rule chain, escalation and audit layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Inbound chat message as delivered by the platform adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Role IDs held by the author in this guild
    #[serde(default)]
    pub author_roles: Vec<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl ChatMessage {
    /// Key used for per-user state that must not leak across guilds
    pub fn user_key(&self) -> String {
        format!("{}:{}", self.guild_id, self.author_id)
    }

    pub fn display_author(&self) -> &str {
        if self.author_name.is_empty() {
            &self.author_id
        } else {
            &self.author_name
        }
    }
}

/// Action taken when a rule fires. Closed set: anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Punishment {
    Delete,
    Warn,
    Mute,
    Ban,
}

impl fmt::Display for Punishment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Punishment::Delete => "delete",
            Punishment::Warn => "warn",
            Punishment::Mute => "mute",
            Punishment::Ban => "ban",
        };
        f.write_str(verb)
    }
}

impl FromStr for Punishment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "delete" => Ok(Punishment::Delete),
            "warn" => Ok(Punishment::Warn),
            "mute" => Ok(Punishment::Mute),
            "ban" => Ok(Punishment::Ban),
            other => Err(anyhow::anyhow!("Unknown punishment '{}' (expected delete, warn, mute or ban)", other)),
        }
    }
}

/// The independently configurable detectors, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Spam,
    Advertising,
    LinkFilter,
    TextFilter,
    Caps,
    EmojiSpam,
}

impl RuleKind {
    pub const ALL: [RuleKind; 6] = [
        RuleKind::Spam,
        RuleKind::Advertising,
        RuleKind::LinkFilter,
        RuleKind::TextFilter,
        RuleKind::Caps,
        RuleKind::EmojiSpam,
    ];

    /// Key of this rule inside the `rules` section of a guild document
    pub fn config_key(&self) -> &'static str {
        match self {
            RuleKind::Spam => "spam",
            RuleKind::Advertising => "advertising",
            RuleKind::LinkFilter => "link_filter",
            RuleKind::TextFilter => "text_filter",
            RuleKind::Caps => "caps",
            RuleKind::EmojiSpam => "emoji_spam",
        }
    }

    /// Whether whitelisted roles and channels skip this rule
    pub fn honours_whitelist(&self) -> bool {
        !matches!(self, RuleKind::LinkFilter)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKind::Spam => "Spam",
            RuleKind::Advertising => "Advertising",
            RuleKind::LinkFilter => "Link Filter",
            RuleKind::TextFilter => "Text Filter",
            RuleKind::Caps => "Excessive Caps",
            RuleKind::EmojiSpam => "Emoji Spam",
        };
        f.write_str(name)
    }
}

impl FromStr for RuleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        RuleKind::ALL
            .iter()
            .copied()
            .find(|rule| rule.config_key() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Unknown rule '{}'", s))
    }
}

/// A rule hit produced by the evaluator chain
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub rule: RuleKind,
    pub details: String,
    pub punishment: Punishment,
}

/// Classification of a single URL or bare domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainVerdict {
    Trusted,
    Suspicious,
    Neutral,
}

/// One tracked message in a channel's spam window
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub timestamp: DateTime<Utc>,
    pub author_id: String,
    pub message_id: String,
    pub content: String,
}

impl From<&ChatMessage> for WindowEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            timestamp: message.timestamp,
            author_id: message.author_id.clone(),
            message_id: message.message_id.clone(),
            content: message.content.clone(),
        }
    }
}

/// Why a ban attempt did not go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanFailure {
    MissingPermissions,
    Error(String),
}

impl fmt::Display for BanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanFailure::MissingPermissions => f.write_str("missing permissions"),
            BanFailure::Error(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("failed to ban user {user_id}: {reason}")]
    BanFailed { user_id: String, reason: BanFailure },
}

/// Result of the escalation step for one violation
#[derive(Debug, Clone, PartialEq)]
pub enum EnforcementOutcome {
    Deleted,
    Warned {
        count: u32,
        limit: u32,
        /// Set when this warning reached the limit and a ban was attempted
        auto_ban: Option<Result<(), BanFailure>>,
    },
    Muted,
    Banned,
}

/// What the engine decided for one message
#[derive(Debug)]
pub struct ModerationReport {
    pub violation: Violation,
    pub outcome: Result<EnforcementOutcome, ModerationError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punishment_parsing() {
        assert_eq!("WARN".parse::<Punishment>().unwrap(), Punishment::Warn);
        assert_eq!(" ban ".parse::<Punishment>().unwrap(), Punishment::Ban);
        assert!("kick".parse::<Punishment>().is_err());

        let parsed: Punishment = serde_json::from_str("\"mute\"").unwrap();
        assert_eq!(parsed, Punishment::Mute);
        assert!(serde_json::from_str::<Punishment>("\"timeout\"").is_err());
    }

    #[test]
    fn test_rule_kind_keys() {
        assert_eq!("link_filter".parse::<RuleKind>().unwrap(), RuleKind::LinkFilter);
        assert_eq!("Emoji Spam".parse::<RuleKind>().unwrap(), RuleKind::EmojiSpam);
        assert!("toxicity".parse::<RuleKind>().is_err());
        assert!(!RuleKind::LinkFilter.honours_whitelist());
        assert!(RuleKind::ALL.iter().filter(|r| r.honours_whitelist()).count() == 5);
    }
}
