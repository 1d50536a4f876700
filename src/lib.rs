//! # AutoMod
//!
//! Automatic moderation engine for community chat servers. Every inbound
//! message runs through an ordered rule chain; the first rule that fires
//! decides the punishment, and repeated warnings escalate to a ban.
//!
//! ## Features
//!
//! - **Rule chain**: spam bursts, server invites, untrusted or suspicious links,
//!   banned words, excessive caps and custom-emoji spam
//! - **Domain classification**: trusted, suspicious or neutral verdicts per URL
//! - **Escalation**: per-guild warning ledger with automatic bans at the limit
//! - **Audit trail**: violation and ban records posted to operator channels
//! - **Hot reload**: per-guild JSON documents watched on disk
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use automod::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ConfigurationManager::new("config"));
//!     config.initialize().await?;
//!
//!     let adapter = Arc::new(DryRunConnection::new());
//!     let automod = AutoModerator::new(config, adapter)?;
//!
//!     let message: ChatMessage = serde_json::from_str(
//!         r#"{"guild_id":"1","channel_id":"2","message_id":"3","author_id":"4","content":"hi"}"#,
//!     )?;
//!     if let Some(report) = automod.handle_message(&message).await? {
//!         println!("{} -> {:?}", report.violation.rule, report.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod platforms;
pub mod config;
pub mod bot;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::AutoModerator;
    pub use crate::config::{AutoModConfig, BotSettings, ConfigurationManager};
    pub use crate::platforms::{dry_run::DryRunConnection, ModerationAdapter, PlatformError};
    pub use crate::types::{
        ChatMessage, DomainVerdict, EnforcementOutcome, ModerationReport, Punishment, RuleKind, Violation,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
