// src/bot/escalation.rs - Punishment execution and warning-to-ban escalation

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bot::audit::{AuditEmitter, BanLogEntry, BanLogKind};
use crate::config::{AutoModConfig, BotSettings};
use crate::platforms::{ModerationAdapter, PlatformError};
use crate::types::{BanFailure, ChatMessage, EnforcementOutcome, ModerationError, Punishment, Violation};

pub const AUTO_BAN_REASON: &str = "reached maximum warnings";

/// Result of recording one warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningTicket {
    pub count: u32,
    /// This caller reached the limit and owns the ban attempt
    pub claimed_ban: bool,
}

/// Warning counts per user. Not durable: the default implementation
/// forgets every warning when the process restarts.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Add one warning. When the new count reaches `limit` and no ban for
    /// this user is in flight, the ban is claimed by this caller only.
    async fn add_warning(&self, user_key: &str, limit: u32) -> WarningTicket;

    /// Release a claimed ban. A ban that went through clears the count;
    /// a failed one keeps it so the next warning claims the ban again.
    async fn settle_ban(&self, user_key: &str, banned: bool);

    async fn get(&self, user_key: &str) -> u32;

    async fn reset(&self, user_key: &str);
}

#[derive(Debug, Default)]
struct LedgerEntry {
    count: u32,
    ban_in_flight: bool,
}

pub struct InMemoryLedgerStore {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn add_warning(&self, user_key: &str, limit: u32) -> WarningTicket {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(user_key.to_string()).or_default();
        entry.count = entry.count.saturating_add(1);

        let claimed_ban = entry.count >= limit && !entry.ban_in_flight;
        if claimed_ban {
            entry.ban_in_flight = true;
        }
        WarningTicket {
            count: entry.count,
            claimed_ban,
        }
    }

    async fn settle_ban(&self, user_key: &str, banned: bool) {
        let mut entries = self.entries.lock().await;
        if banned {
            entries.remove(user_key);
        } else if let Some(entry) = entries.get_mut(user_key) {
            entry.ban_in_flight = false;
        }
    }

    async fn get(&self, user_key: &str) -> u32 {
        self.entries.lock().await.get(user_key).map(|e| e.count).unwrap_or(0)
    }

    async fn reset(&self, user_key: &str) {
        self.entries.lock().await.remove(user_key);
    }
}

/// Applies the punishment chosen by the rule that fired. Each step is
/// attempted on its own: a failed DM or audit post never stops a delete
/// or ban, and a failed delete never stops a ban.
pub struct EscalationEngine {
    adapter: Arc<dyn ModerationAdapter>,
    ledger: Arc<dyn LedgerStore>,
    audit: AuditEmitter,
}

impl EscalationEngine {
    pub fn new(adapter: Arc<dyn ModerationAdapter>, ledger: Arc<dyn LedgerStore>) -> Self {
        let audit = AuditEmitter::new(adapter.clone());
        Self { adapter, ledger, audit }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub async fn enforce(
        &self,
        violation: &Violation,
        message: &ChatMessage,
        config: &AutoModConfig,
        settings: &BotSettings,
    ) -> Result<EnforcementOutcome, ModerationError> {
        info!(
            "{} violation by {} in #{}: {} -> {}",
            violation.rule, message.author_id, message.channel_id, violation.details, violation.punishment
        );

        let log_channel = config.log_channel.as_deref();

        match violation.punishment {
            Punishment::Delete => {
                self.delete_best_effort(message).await;
                self.audit
                    .log_violation(log_channel, message, violation.rule, &violation.details, "Message Deleted")
                    .await;
                Ok(EnforcementOutcome::Deleted)
            }
            Punishment::Warn => Ok(self.warn(violation, message, config, settings).await),
            Punishment::Mute => {
                // no timeout is applied yet, the message is only removed
                self.delete_best_effort(message).await;
                self.audit
                    .log_violation(log_channel, message, violation.rule, &violation.details, "User Muted")
                    .await;
                Ok(EnforcementOutcome::Muted)
            }
            Punishment::Ban => {
                self.delete_best_effort(message).await;
                let result = self.ban(message, &violation.details).await;

                let (action, kind) = match &result {
                    Ok(()) => ("User Banned", BanLogKind::Banned),
                    Err(failure) => ("Ban Failed", BanLogKind::Failed(failure.clone())),
                };
                self.audit
                    .log_violation(log_channel, message, violation.rule, &violation.details, action)
                    .await;
                self.log_ban(settings, message, violation, kind, violation.details.clone()).await;

                result
                    .map(|()| EnforcementOutcome::Banned)
                    .map_err(|reason| ModerationError::BanFailed {
                        user_id: message.author_id.clone(),
                        reason,
                    })
            }
        }
    }

    async fn warn(
        &self,
        violation: &Violation,
        message: &ChatMessage,
        config: &AutoModConfig,
        settings: &BotSettings,
    ) -> EnforcementOutcome {
        let user_key = message.user_key();
        let limit = config.warning_limit;
        let ticket = self.ledger.add_warning(&user_key, limit).await;
        let count = ticket.count;

        let notice = format!(
            "You have received a warning.\nRule: {}\nReason: {}\nWarnings: {}/{}",
            violation.rule, violation.details, count, limit
        );
        // best-effort
        match self.adapter.send_direct_message(&message.author_id, &notice).await {
            Ok(()) => {}
            Err(PlatformError::DirectMessagesClosed) => {
                debug!("{} does not accept direct messages, warning not delivered", message.author_id)
            }
            Err(e) => warn!("Failed to deliver warning to {}: {}", message.author_id, e),
        }

        self.delete_best_effort(message).await;
        self.audit
            .log_violation(
                config.log_channel.as_deref(),
                message,
                violation.rule,
                &violation.details,
                &format!("Warning issued ({}/{})", count, limit),
            )
            .await;

        if !ticket.claimed_ban {
            if count >= limit {
                debug!("Auto-ban of {} already in progress", message.author_id);
            }
            return EnforcementOutcome::Warned { count, limit, auto_ban: None };
        }

        info!("{} reached {}/{} warnings, banning", message.author_id, count, limit);
        let result = self.ban(message, AUTO_BAN_REASON).await;
        self.ledger.settle_ban(&user_key, result.is_ok()).await;
        let kind = match &result {
            Ok(()) => BanLogKind::AutoBanned,
            Err(failure) => BanLogKind::Failed(failure.clone()),
        };
        self.log_ban(settings, message, violation, kind, AUTO_BAN_REASON.to_string()).await;

        EnforcementOutcome::Warned {
            count,
            limit,
            auto_ban: Some(result),
        }
    }

    async fn ban(&self, message: &ChatMessage, reason: &str) -> Result<(), BanFailure> {
        let audit_reason = format!("AutoMod: {}", reason);
        match self.adapter.ban_user(&message.guild_id, &message.author_id, &audit_reason).await {
            Ok(()) => {
                info!("Banned {} from guild {}: {}", message.author_id, message.guild_id, reason);
                Ok(())
            }
            Err(PlatformError::MissingPermissions) => {
                error!("Cannot ban {} in guild {}: missing permissions", message.author_id, message.guild_id);
                Err(BanFailure::MissingPermissions)
            }
            Err(e) => {
                error!("Failed to ban {} in guild {}: {}", message.author_id, message.guild_id, e);
                Err(BanFailure::Error(e.to_string()))
            }
        }
    }

    async fn log_ban(
        &self,
        settings: &BotSettings,
        message: &ChatMessage,
        violation: &Violation,
        kind: BanLogKind,
        reason: String,
    ) {
        let entry = BanLogEntry {
            kind,
            guild_id: message.guild_id.clone(),
            user_id: message.author_id.clone(),
            user_name: message.display_author().to_string(),
            rule: violation.rule,
            reason,
        };
        self.audit.log_ban(settings.ban_log_channel.as_deref(), &entry).await;
    }

    /// best-effort: the message may already be gone
    async fn delete_best_effort(&self, message: &ChatMessage) {
        if let Err(e) = self.adapter.delete_message(&message.channel_id, &message.message_id).await {
            debug!("Could not delete message {} in #{}: {}", message.message_id, message.channel_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::dry_run::{AdapterCall, DryRunConnection};
    use crate::types::RuleKind;

    fn message() -> ChatMessage {
        ChatMessage {
            guild_id: "g1".to_string(),
            channel_id: "general".to_string(),
            message_id: "m1".to_string(),
            author_id: "u1".to_string(),
            author_name: "alice".to_string(),
            content: "badword".to_string(),
            timestamp: chrono::Utc::now(),
            author_roles: Vec::new(),
            is_bot: false,
        }
    }

    fn violation(punishment: Punishment) -> Violation {
        Violation {
            rule: RuleKind::TextFilter,
            details: "Banned word: badword".to_string(),
            punishment,
        }
    }

    fn setup() -> (Arc<DryRunConnection>, EscalationEngine, AutoModConfig, BotSettings) {
        let adapter = Arc::new(DryRunConnection::new());
        let engine = EscalationEngine::new(adapter.clone(), Arc::new(InMemoryLedgerStore::new()));
        let mut config = AutoModConfig::default();
        config.log_channel = Some("mod-log".to_string());
        config.warning_limit = 3;
        let settings = BotSettings {
            ban_log_channel: Some("ban-log".to_string()),
            ..BotSettings::default()
        };
        (adapter, engine, config, settings)
    }

    #[tokio::test]
    async fn test_delete_punishment() {
        let (adapter, engine, config, settings) = setup();

        let outcome = engine.enforce(&violation(Punishment::Delete), &message(), &config, &settings).await;
        assert_eq!(outcome.unwrap(), EnforcementOutcome::Deleted);
        assert_eq!(adapter.deleted_ids().await, vec!["m1".to_string()]);
        assert_eq!(adapter.channel_messages("mod-log").await.len(), 1);
        assert!(adapter.bans().await.is_empty());
    }

    #[tokio::test]
    async fn test_warnings_escalate_to_single_ban() {
        let (adapter, engine, config, settings) = setup();
        let msg = message();

        for expected in 1..=2 {
            let outcome = engine.enforce(&violation(Punishment::Warn), &msg, &config, &settings).await.unwrap();
            assert_eq!(outcome, EnforcementOutcome::Warned { count: expected, limit: 3, auto_ban: None });
        }

        let outcome = engine.enforce(&violation(Punishment::Warn), &msg, &config, &settings).await.unwrap();
        assert_eq!(outcome, EnforcementOutcome::Warned { count: 3, limit: 3, auto_ban: Some(Ok(())) });
        assert_eq!(adapter.bans().await, vec![("g1".to_string(), "u1".to_string())]);
        assert_eq!(engine.ledger().get(&msg.user_key()).await, 0);

        let ban_log = adapter.channel_messages("ban-log").await;
        assert_eq!(ban_log.len(), 1);
        assert!(ban_log[0].starts_with("**User Auto-Banned**"));

        // counting restarts after the ban
        let outcome = engine.enforce(&violation(Punishment::Warn), &msg, &config, &settings).await.unwrap();
        assert_eq!(outcome, EnforcementOutcome::Warned { count: 1, limit: 3, auto_ban: None });
        assert_eq!(adapter.bans().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_warnings_ban_once() {
        let adapter = Arc::new(DryRunConnection::with_latency(std::time::Duration::from_millis(20)));
        let engine = EscalationEngine::new(adapter.clone(), Arc::new(InMemoryLedgerStore::new()));
        let mut config = AutoModConfig::default();
        config.warning_limit = 2;
        let settings = BotSettings {
            ban_log_channel: Some("ban-log".to_string()),
            ..BotSettings::default()
        };
        let msg = message();
        let warn = violation(Punishment::Warn);

        engine.enforce(&warn, &msg, &config, &settings).await.unwrap();
        let (a, b) = tokio::join!(
            engine.enforce(&warn, &msg, &config, &settings),
            engine.enforce(&warn, &msg, &config, &settings),
        );

        let attempts = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(|outcome| matches!(outcome, EnforcementOutcome::Warned { auto_ban: Some(_), .. }))
            .count();
        assert_eq!(attempts, 1);
        assert_eq!(adapter.bans().await.len(), 1);
        assert_eq!(adapter.channel_messages("ban-log").await.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_hands_out_one_ban_claim() {
        let ledger = InMemoryLedgerStore::new();

        assert!(!ledger.add_warning("g1:u1", 2).await.claimed_ban);
        assert_eq!(ledger.add_warning("g1:u1", 2).await, WarningTicket { count: 2, claimed_ban: true });
        assert_eq!(ledger.add_warning("g1:u1", 2).await, WarningTicket { count: 3, claimed_ban: false });

        // failed ban: count kept, next warning claims again
        ledger.settle_ban("g1:u1", false).await;
        assert_eq!(ledger.get("g1:u1").await, 3);
        assert!(ledger.add_warning("g1:u1", 2).await.claimed_ban);

        ledger.settle_ban("g1:u1", true).await;
        assert_eq!(ledger.get("g1:u1").await, 0);
        assert_eq!(ledger.add_warning("g1:u1", 2).await.count, 1);
    }

    #[tokio::test]
    async fn test_warning_notifies_user() {
        let (adapter, engine, config, settings) = setup();
        engine.enforce(&violation(Punishment::Warn), &message(), &config, &settings).await.unwrap();

        let dm = adapter.calls().await.into_iter().find_map(|c| match c {
            AdapterCall::DirectMessage { user_id, text } => Some((user_id, text)),
            _ => None,
        });
        let (user_id, text) = dm.unwrap();
        assert_eq!(user_id, "u1");
        assert!(text.contains("Rule: Text Filter"));
        assert!(text.contains("Warnings: 1/3"));
        assert!(adapter.channel_messages("mod-log").await[0].contains("Warning issued (1/3)"));
    }

    #[tokio::test]
    async fn test_closed_dms_do_not_block_delete() {
        let (adapter, engine, config, settings) = setup();
        adapter.set_dms_closed(true);

        let outcome = engine.enforce(&violation(Punishment::Warn), &message(), &config, &settings).await;
        assert!(matches!(outcome, Ok(EnforcementOutcome::Warned { count: 1, .. })));
        assert_eq!(adapter.deleted_ids().await, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_auto_ban_keeps_count() {
        let (adapter, engine, mut config, settings) = setup();
        config.warning_limit = 1;
        adapter.set_ban_failure(Some(PlatformError::MissingPermissions)).await;
        let msg = message();

        let outcome = engine.enforce(&violation(Punishment::Warn), &msg, &config, &settings).await.unwrap();
        assert_eq!(
            outcome,
            EnforcementOutcome::Warned {
                count: 1,
                limit: 1,
                auto_ban: Some(Err(BanFailure::MissingPermissions)),
            }
        );
        assert_eq!(engine.ledger().get(&msg.user_key()).await, 1);
        assert!(adapter.channel_messages("ban-log").await[0].starts_with("**Ban Failed - Missing Permissions**"));

        // the next warning retries the ban
        adapter.set_ban_failure(None).await;
        let outcome = engine.enforce(&violation(Punishment::Warn), &msg, &config, &settings).await.unwrap();
        assert_eq!(outcome, EnforcementOutcome::Warned { count: 2, limit: 1, auto_ban: Some(Ok(())) });
        assert_eq!(engine.ledger().get(&msg.user_key()).await, 0);
    }

    #[tokio::test]
    async fn test_ban_failure_is_reported_and_message_deleted() {
        let (adapter, engine, config, settings) = setup();
        adapter.set_ban_failure(Some(PlatformError::Other("gateway timeout".into()))).await;

        let outcome = engine.enforce(&violation(Punishment::Ban), &message(), &config, &settings).await;
        match outcome {
            Err(ModerationError::BanFailed { user_id, reason }) => {
                assert_eq!(user_id, "u1");
                assert_eq!(reason, BanFailure::Error("gateway timeout".into()));
            }
            other => panic!("expected ban failure, got {:?}", other),
        }
        assert_eq!(adapter.deleted_ids().await, vec!["m1".to_string()]);
        assert!(adapter.channel_messages("ban-log").await[0].starts_with("**Ban Failed - Error**"));
    }

    #[tokio::test]
    async fn test_ban_and_mute_punishments() {
        let (adapter, engine, config, settings) = setup();

        let outcome = engine.enforce(&violation(Punishment::Ban), &message(), &config, &settings).await;
        assert_eq!(outcome.unwrap(), EnforcementOutcome::Banned);
        assert!(adapter.channel_messages("ban-log").await[0].starts_with("**User Banned**"));

        let outcome = engine.enforce(&violation(Punishment::Mute), &message(), &config, &settings).await;
        assert_eq!(outcome.unwrap(), EnforcementOutcome::Muted);
        assert!(adapter.channel_messages("mod-log").await.last().unwrap().contains("Action: User Muted"));
    }
}
