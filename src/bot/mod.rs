use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;

use crate::config::{AutoModConfig, ConfigurationManager};
use crate::platforms::ModerationAdapter;
use crate::types::{ChatMessage, DomainVerdict, ModerationReport, RuleKind};

pub mod audit;
pub mod domain;
pub mod escalation;
pub mod rules;
pub mod spam_window;

use domain::DomainPolicy;
use escalation::{EscalationEngine, InMemoryLedgerStore, LedgerStore};
use rules::RuleEvaluator;
use spam_window::{InMemoryWindowStore, SpamTracker, WindowStore};

/// Moderation engine: runs every inbound message through the rule chain
/// and applies the punishment of the first rule that fires.
///
/// All state lives behind the window and ledger stores, so one instance
/// can be shared across tasks handling messages concurrently.
pub struct AutoModerator {
    config: Arc<ConfigurationManager>,
    adapter: Arc<dyn ModerationAdapter>,
    spam: SpamTracker,
    ledger: Arc<dyn LedgerStore>,
    evaluator: RuleEvaluator,
    escalation: EscalationEngine,
}

impl AutoModerator {
    pub fn new(config: Arc<ConfigurationManager>, adapter: Arc<dyn ModerationAdapter>) -> Result<Self> {
        Self::with_stores(
            config,
            adapter,
            Arc::new(InMemoryWindowStore::new()),
            Arc::new(InMemoryLedgerStore::new()),
        )
    }

    pub fn with_stores(
        config: Arc<ConfigurationManager>,
        adapter: Arc<dyn ModerationAdapter>,
        windows: Arc<dyn WindowStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Result<Self> {
        let evaluator = RuleEvaluator::new()?;
        let escalation = EscalationEngine::new(adapter.clone(), ledger.clone());

        info!("AutoMod engine ready on platform '{}'", adapter.platform_name());

        Ok(Self {
            config,
            adapter,
            spam: SpamTracker::new(windows),
            ledger,
            evaluator,
            escalation,
        })
    }

    pub fn config(&self) -> &Arc<ConfigurationManager> {
        &self.config
    }

    pub fn spam_tracker(&self) -> &SpamTracker {
        &self.spam
    }

    /// Handle one inbound message. Returns `None` when no rule fired.
    pub async fn handle_message(&self, message: &ChatMessage) -> Result<Option<ModerationReport>> {
        let settings = self.config.get_bot_settings().await;
        if settings.ignore_bots && message.is_bot {
            return Ok(None);
        }

        let config = self.config.get_guild_config(&message.guild_id).await;
        if !config.enabled {
            return Ok(None);
        }

        self.spam.observe(message).await;

        let Some(violation) = self.evaluator.evaluate(message, &config, &self.spam).await else {
            return Ok(None);
        };

        if violation.rule == RuleKind::Spam {
            let sweep = self
                .spam
                .sweep_burst(
                    self.adapter.as_ref(),
                    message,
                    config.rules.spam.time_window_seconds,
                    settings.spam_fetch_limit,
                )
                .await;
            debug!(
                "Spam sweep for {} removed {} messages (bulk: {})",
                message.author_id,
                sweep.message_ids.len(),
                sweep.bulk_succeeded
            );
        }

        let outcome = self.escalation.enforce(&violation, message, &config, &settings).await;
        Ok(Some(ModerationReport { violation, outcome }))
    }

    /// Current warning count of a user in a guild
    pub async fn warnings(&self, guild_id: &str, user_id: &str) -> u32 {
        self.ledger.get(&format!("{}:{}", guild_id, user_id)).await
    }

    pub async fn reset_warnings(&self, guild_id: &str, user_id: &str) {
        self.ledger.reset(&format!("{}:{}", guild_id, user_id)).await;
        info!("Cleared warnings of {} in guild {}", user_id, guild_id);
    }

    /// Classify a URL against a guild's trusted domains and shortener list
    pub async fn classify_url(&self, guild_id: &str, url: &str) -> DomainVerdict {
        let config: AutoModConfig = self.config.get_guild_config(guild_id).await;
        let policy = DomainPolicy {
            trusted: &config.trusted_domains,
            shorteners: &config.rules.link_filter.shorteners,
        };
        self.evaluator.classifier().classify(url, &policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::dry_run::DryRunConnection;
    use crate::types::{EnforcementOutcome, Punishment};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        config: Arc<ConfigurationManager>,
        adapter: Arc<DryRunConnection>,
        automod: AutoModerator,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(ConfigurationManager::new(dir.path()));
        config.load().await.unwrap();
        config.set_enabled("g1", true).await.unwrap();
        config.set_log_channel("g1", Some("mod-log".to_string())).await.unwrap();

        let adapter = Arc::new(DryRunConnection::new());
        let automod = AutoModerator::new(config.clone(), adapter.clone()).unwrap();
        Harness {
            _dir: dir,
            config,
            adapter,
            automod,
        }
    }

    fn message(id: &str, author: &str, channel: &str, content: &str, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            guild_id: "g1".to_string(),
            channel_id: channel.to_string(),
            message_id: id.to_string(),
            author_id: author.to_string(),
            author_name: String::new(),
            content: content.to_string(),
            timestamp: at,
            author_roles: Vec::new(),
            is_bot: false,
        }
    }

    #[tokio::test]
    async fn test_disabled_guild_is_ignored() {
        let h = harness().await;
        h.config.set_enabled("g1", false).await.unwrap();

        let msg = message("m1", "u1", "general", "JOIN discord.gg/abc NOW", Utc::now());
        assert!(h.automod.handle_message(&msg).await.unwrap().is_none());
        assert!(h.adapter.calls().await.is_empty());
        assert!(h.automod.spam_tracker().store().entries("general").await.is_empty());
    }

    #[tokio::test]
    async fn test_bots_are_ignored_by_default() {
        let h = harness().await;
        let mut msg = message("m1", "bot", "general", "discord.gg/abc", Utc::now());
        msg.is_bot = true;
        assert!(h.automod.handle_message(&msg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spam_burst_fires_once_and_empties_window() {
        let h = harness().await;
        let now = Utc::now();

        let mut reports = Vec::new();
        for i in 0..5 {
            let msg = message(&format!("m{}", i), "u1", "general", &format!("hello {}", i), now);
            h.adapter.post(&msg).await;
            if let Some(report) = h.automod.handle_message(&msg).await.unwrap() {
                reports.push(report);
            }
        }

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].violation.rule, RuleKind::Spam);
        assert_eq!(reports[0].violation.details, "Sent 5 messages within 5 seconds");
        assert!(h
            .automod
            .spam_tracker()
            .store()
            .entries("general")
            .await
            .iter()
            .all(|e| e.author_id != "u1"));

        let mut deleted = h.adapter.deleted_ids().await;
        deleted.sort();
        deleted.dedup();
        assert_eq!(deleted, vec!["m0", "m1", "m2", "m3", "m4"]);

        // the next message starts a fresh window
        let next = message("m5", "u1", "general", "hello again", now);
        assert!(h.automod.handle_message(&next).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_warnings_escalate_to_ban_and_reset() {
        let h = harness().await;
        h.config.set_banned_words("g1", vec!["scam".to_string()]).await.unwrap();
        h.config.set_warning_limit("g1", 2).await.unwrap();
        let now = Utc::now();

        let first = message("m1", "u1", "general", "this is a scam", now);
        let report = h.automod.handle_message(&first).await.unwrap().unwrap();
        assert_eq!(report.violation.punishment, Punishment::Warn);
        assert_eq!(h.automod.warnings("g1", "u1").await, 1);

        let second = message("m2", "u1", "other", "another SCAM", now);
        let report = h.automod.handle_message(&second).await.unwrap().unwrap();
        assert_eq!(
            report.outcome.unwrap(),
            EnforcementOutcome::Warned { count: 2, limit: 2, auto_ban: Some(Ok(())) }
        );
        assert_eq!(h.adapter.bans().await.len(), 1);
        assert_eq!(h.automod.warnings("g1", "u1").await, 0);

        let third = message("m3", "u1", "general", "scam", now);
        let report = h.automod.handle_message(&third).await.unwrap().unwrap();
        assert!(matches!(report.outcome, Ok(EnforcementOutcome::Warned { count: 1, auto_ban: None, .. })));
        assert_eq!(h.adapter.bans().await.len(), 1);
    }

    #[tokio::test]
    async fn test_warnings_are_per_guild() {
        let h = harness().await;
        h.config.set_enabled("g2", true).await.unwrap();
        for guild in ["g1", "g2"] {
            h.config.set_banned_words(guild, vec!["scam".to_string()]).await.unwrap();
        }

        let mut msg = message("m1", "u1", "general", "scam", Utc::now());
        h.automod.handle_message(&msg).await.unwrap();
        msg.guild_id = "g2".to_string();
        msg.message_id = "m2".to_string();
        h.automod.handle_message(&msg).await.unwrap();
        h.automod.handle_message(&msg).await.unwrap();

        assert_eq!(h.automod.warnings("g1", "u1").await, 1);
        assert_eq!(h.automod.warnings("g2", "u1").await, 2);

        h.automod.reset_warnings("g2", "u1").await;
        assert_eq!(h.automod.warnings("g2", "u1").await, 0);
        assert_eq!(h.automod.warnings("g1", "u1").await, 1);
    }

    #[tokio::test]
    async fn test_link_filter_ignores_whitelist() {
        let h = harness().await;
        h.config.add_whitelist_channel("g1", "staff").await.unwrap();
        h.config.set_banned_words("g1", vec!["scam".to_string()]).await.unwrap();

        let phishing = message("m1", "u1", "staff", "free nitro at http://discord-nitro-gift.xyz/claim", Utc::now());
        let report = h.automod.handle_message(&phishing).await.unwrap().unwrap();
        assert_eq!(report.violation.rule, RuleKind::LinkFilter);

        // invite text in the path does not turn a link into an invite
        h.config.add_whitelist_role("g1", "vip").await.unwrap();
        let mut hidden = message("m3", "u2", "general", "http://192.168.1.20/discord.gg/pay", Utc::now());
        hidden.author_roles.push("vip".to_string());
        let report = h.automod.handle_message(&hidden).await.unwrap().unwrap();
        assert_eq!(report.violation.rule, RuleKind::LinkFilter);

        // other rules still honour the whitelist
        let word = message("m2", "u1", "staff", "scam", Utc::now());
        assert!(h.automod.handle_message(&word).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trusted_links_are_never_logged() {
        let h = harness().await;

        let msg = message(
            "m1",
            "u1",
            "general",
            "see https://github.com/rust-lang and www.youtube.com/watch?v=1",
            Utc::now(),
        );
        assert!(h.automod.handle_message(&msg).await.unwrap().is_none());
        assert!(h.adapter.channel_messages("mod-log").await.is_empty());

        // one bad link among trusted ones is enough
        let mixed = message("m2", "u1", "general", "https://github.com then bit.ly/xyz", Utc::now());
        let report = h.automod.handle_message(&mixed).await.unwrap().unwrap();
        assert_eq!(report.violation.rule, RuleKind::LinkFilter);
        assert_eq!(report.violation.details, "Suspicious link: bit.ly/xyz");
        assert_eq!(h.adapter.channel_messages("mod-log").await.len(), 1);
    }

    #[tokio::test]
    async fn test_classify_url_uses_guild_trust() {
        let h = harness().await;
        h.config.add_trusted_domain("g1", "example.org").await.unwrap();

        assert_eq!(h.automod.classify_url("g1", "https://docs.example.org/page").await, DomainVerdict::Trusted);
        assert_eq!(h.automod.classify_url("g2", "https://docs.example.org/page").await, DomainVerdict::Neutral);
        assert_eq!(h.automod.classify_url("g1", "http://192.168.0.1/login").await, DomainVerdict::Suspicious);
    }
}
