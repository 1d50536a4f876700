// src/config/mod.rs - Per-guild AutoMod documents and global bot settings

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::bot::domain::{normalize_domain, DEFAULT_SHORTENERS};
use crate::bot::spam_window::MAX_WINDOW_SECONDS;
use crate::types::{ChatMessage, Punishment, RuleKind};

const BOT_SETTINGS_FILE: &str = "bot.yaml";
const GUILDS_DIR: &str = "guilds";

pub const DEFAULT_WARNING_LIMIT: u32 = 5;

/// Domains trusted out of the box
pub const DEFAULT_TRUSTED_DOMAINS: &[&str] = &[
    "discord.com", "discordapp.com", "discordapp.net", "youtube.com", "youtu.be",
    "google.com", "github.com", "twitch.tv", "twitter.com", "x.com", "reddit.com",
    "wikipedia.org", "tenor.com", "giphy.com", "spotify.com", "imgur.com",
];

/// AutoMod settings for one guild. Missing keys load with the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoModConfig {
    pub enabled: bool,
    /// Channel receiving violation records
    pub log_channel: Option<String>,
    /// Warnings before an automatic ban
    pub warning_limit: u32,
    pub trusted_domains: Vec<String>,
    pub rules: RuleSettings,
    pub whitelist: Whitelist,
}

impl Default for AutoModConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_channel: None,
            warning_limit: DEFAULT_WARNING_LIMIT,
            trusted_domains: DEFAULT_TRUSTED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            rules: RuleSettings::default(),
            whitelist: Whitelist::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub spam: SpamRule,
    pub advertising: AdvertisingRule,
    pub link_filter: LinkFilterRule,
    pub text_filter: TextFilterRule,
    pub caps: CapsRule,
    pub emoji_spam: EmojiSpamRule,
}

impl RuleSettings {
    pub fn is_enabled(&self, rule: RuleKind) -> bool {
        match rule {
            RuleKind::Spam => self.spam.enabled,
            RuleKind::Advertising => self.advertising.enabled,
            RuleKind::LinkFilter => self.link_filter.enabled,
            RuleKind::TextFilter => self.text_filter.enabled,
            RuleKind::Caps => self.caps.enabled,
            RuleKind::EmojiSpam => self.emoji_spam.enabled,
        }
    }

    pub fn set_enabled(&mut self, rule: RuleKind, enabled: bool) {
        match rule {
            RuleKind::Spam => self.spam.enabled = enabled,
            RuleKind::Advertising => self.advertising.enabled = enabled,
            RuleKind::LinkFilter => self.link_filter.enabled = enabled,
            RuleKind::TextFilter => self.text_filter.enabled = enabled,
            RuleKind::Caps => self.caps.enabled = enabled,
            RuleKind::EmojiSpam => self.emoji_spam.enabled = enabled,
        }
    }

    pub fn punishment(&self, rule: RuleKind) -> Punishment {
        match rule {
            RuleKind::Spam => self.spam.punishment,
            RuleKind::Advertising => self.advertising.punishment,
            RuleKind::LinkFilter => self.link_filter.punishment,
            RuleKind::TextFilter => self.text_filter.punishment,
            RuleKind::Caps => self.caps.punishment,
            RuleKind::EmojiSpam => self.emoji_spam.punishment,
        }
    }

    pub fn set_punishment(&mut self, rule: RuleKind, punishment: Punishment) {
        match rule {
            RuleKind::Spam => self.spam.punishment = punishment,
            RuleKind::Advertising => self.advertising.punishment = punishment,
            RuleKind::LinkFilter => self.link_filter.punishment = punishment,
            RuleKind::TextFilter => self.text_filter.punishment = punishment,
            RuleKind::Caps => self.caps.punishment = punishment,
            RuleKind::EmojiSpam => self.emoji_spam.punishment = punishment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamRule {
    pub enabled: bool,
    pub max_messages: u32,
    pub time_window_seconds: u64,
    pub punishment: Punishment,
}

impl Default for SpamRule {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: 5,
            time_window_seconds: 5,
            punishment: Punishment::Warn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingRule {
    pub enabled: bool,
    pub block_invites: bool,
    pub block_urls: bool,
    pub punishment: Punishment,
}

impl Default for AdvertisingRule {
    fn default() -> Self {
        Self {
            enabled: true,
            block_invites: true,
            block_urls: false,
            punishment: Punishment::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkFilterRule {
    pub enabled: bool,
    pub block_suspicious: bool,
    /// Block every link that is not on the trusted list
    pub allow_trusted_only: bool,
    pub shorteners: Vec<String>,
    pub punishment: Punishment,
}

impl Default for LinkFilterRule {
    fn default() -> Self {
        Self {
            enabled: true,
            block_suspicious: true,
            allow_trusted_only: false,
            shorteners: DEFAULT_SHORTENERS.iter().map(|s| s.to_string()).collect(),
            punishment: Punishment::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextFilterRule {
    pub enabled: bool,
    pub banned_words: Vec<String>,
    pub punishment: Punishment,
}

impl Default for TextFilterRule {
    fn default() -> Self {
        Self {
            enabled: true,
            banned_words: Vec::new(),
            punishment: Punishment::Warn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsRule {
    pub enabled: bool,
    pub threshold_ratio: f64,
    pub min_length: usize,
    pub punishment: Punishment,
}

impl Default for CapsRule {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ratio: 0.7,
            min_length: 10,
            punishment: Punishment::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmojiSpamRule {
    pub enabled: bool,
    pub max_emojis: usize,
    pub punishment: Punishment,
}

impl Default for EmojiSpamRule {
    fn default() -> Self {
        Self {
            enabled: true,
            max_emojis: 10,
            punishment: Punishment::Delete,
        }
    }
}

/// Roles and channels exempt from every rule except the link filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Whitelist {
    pub roles: Vec<String>,
    pub channels: Vec<String>,
}

impl Whitelist {
    pub fn exempts(&self, message: &ChatMessage) -> bool {
        self.channels.contains(&message.channel_id)
            || message.author_roles.iter().any(|role| self.roles.contains(role))
    }
}

/// Global settings shared by every guild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Channel receiving ban and auto-ban records
    pub ban_log_channel: Option<String>,
    pub ignore_bots: bool,
    /// History fetched when cleaning up a spam burst
    pub spam_fetch_limit: usize,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            ban_log_channel: None,
            ignore_bots: true,
            spam_fetch_limit: 100,
        }
    }
}

/// Events broadcasted when configuration changes
#[derive(Debug, Clone)]
pub enum ConfigChangeEvent {
    GuildUpdated { guild_id: String },
    BotSettingsUpdated,
    ValidationError { file: String, error: String },
    ReloadComplete { files_loaded: Vec<String> },
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_guild_config(&self, config: &AutoModConfig) -> Result<()> {
        if config.warning_limit == 0 {
            return Err(anyhow::anyhow!("warning_limit must be at least 1"));
        }

        let spam = &config.rules.spam;
        if spam.max_messages == 0 {
            return Err(anyhow::anyhow!("spam.max_messages must be at least 1"));
        }
        if spam.time_window_seconds == 0 || spam.time_window_seconds > MAX_WINDOW_SECONDS {
            return Err(anyhow::anyhow!(
                "spam.time_window_seconds must be between 1 and {}, got {}",
                MAX_WINDOW_SECONDS,
                spam.time_window_seconds
            ));
        }

        let ratio = config.rules.caps.threshold_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(anyhow::anyhow!("caps.threshold_ratio must be in (0, 1], got {}", ratio));
        }

        if config.rules.text_filter.banned_words.iter().any(|w| w.trim().is_empty()) {
            return Err(anyhow::anyhow!("text_filter.banned_words cannot contain empty entries"));
        }

        if config.trusted_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(anyhow::anyhow!("trusted_domains cannot contain empty entries"));
        }

        if config.rules.link_filter.shorteners.iter().any(|d| d.trim().is_empty()) {
            return Err(anyhow::anyhow!("link_filter.shorteners cannot contain empty entries"));
        }

        Ok(())
    }

    pub fn validate_bot_settings(&self, settings: &BotSettings) -> Result<()> {
        if settings.spam_fetch_limit == 0 {
            return Err(anyhow::anyhow!("spam_fetch_limit must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// File-backed settings store. Every mutation is validated and written
/// through to disk before it returns.
#[derive(Clone)]
pub struct ConfigurationManager {
    config_dir: PathBuf,
    guilds: Arc<RwLock<HashMap<String, AutoModConfig>>>,
    bot_settings: Arc<RwLock<BotSettings>>,
    watchers: Arc<RwLock<Vec<RecommendedWatcher>>>,
    /// Serializes read-modify-write of documents
    update_lock: Arc<Mutex<()>>,
    change_notifier: broadcast::Sender<ConfigChangeEvent>,
    validator: Arc<ConfigValidator>,
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            guilds: Arc::new(RwLock::new(HashMap::new())),
            bot_settings: Arc::new(RwLock::new(BotSettings::default())),
            watchers: Arc::new(RwLock::new(Vec::new())),
            update_lock: Arc::new(Mutex::new(())),
            change_notifier: tx,
            validator: Arc::new(ConfigValidator::new()),
        }
    }

    /// Create the directory layout, load everything and start watching for edits
    pub async fn initialize(&self) -> Result<()> {
        self.load().await?;
        self.setup_file_watchers().await?;
        info!("Configuration manager initialized from {}", self.config_dir.display());
        Ok(())
    }

    /// Load all documents without starting the file watcher
    pub async fn load(&self) -> Result<()> {
        let guilds_dir = self.config_dir.join(GUILDS_DIR);
        if !guilds_dir.exists() {
            fs::create_dir_all(&guilds_dir).await?;
            info!("Created configuration directory: {}", guilds_dir.display());
        }

        let mut files_loaded = Vec::new();

        if !self.config_dir.join(BOT_SETTINGS_FILE).exists() {
            self.save_bot_settings(BotSettings::default()).await?;
            files_loaded.push(format!("{} (created default)", BOT_SETTINGS_FILE));
        } else if let Err(e) = self.load_bot_settings().await {
            // the operator's file stays on disk untouched
            error!("Invalid bot settings, using defaults until fixed: {}", e);
            *self.bot_settings.write().await = BotSettings::default();
        } else {
            files_loaded.push(BOT_SETTINGS_FILE.to_string());
        }

        let mut entries = fs::read_dir(&guilds_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(guild_id) = guild_id_from_path(&path) else {
                continue;
            };
            let config = Self::read_guild_document(&path, &self.validator).await;
            self.guilds.write().await.insert(guild_id, config);
            files_loaded.push(format!("{}/{}", GUILDS_DIR, entry.file_name().to_string_lossy()));
        }

        info!("Loaded {} configuration files", files_loaded.len());
        let _ = self.change_notifier.send(ConfigChangeEvent::ReloadComplete { files_loaded });
        Ok(())
    }

    async fn load_bot_settings(&self) -> Result<()> {
        let path = self.config_dir.join(BOT_SETTINGS_FILE);
        let settings = Self::read_bot_settings(&path, &self.validator).await?;
        *self.bot_settings.write().await = settings;
        debug!("Loaded bot settings from {}", path.display());
        Ok(())
    }

    async fn read_bot_settings(path: &Path, validator: &ConfigValidator) -> Result<BotSettings> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let settings: BotSettings = serde_yaml::from_str(&content)?;
        validator.validate_bot_settings(&settings)?;
        Ok(settings)
    }

    async fn parse_guild_document(path: &Path, validator: &ConfigValidator) -> Result<AutoModConfig> {
        let content = fs::read_to_string(path).await?;
        let config: AutoModConfig = serde_json::from_str(&content)?;
        validator.validate_guild_config(&config)?;
        Ok(config)
    }

    /// A broken document never takes the engine down: it is reported and
    /// replaced in memory by defaults, the file is left for the operator.
    async fn read_guild_document(path: &Path, validator: &ConfigValidator) -> AutoModConfig {
        match Self::parse_guild_document(path, validator).await {
            Ok(config) => {
                debug!("Loaded guild configuration from {}", path.display());
                config
            }
            Err(e) => {
                error!("Invalid guild configuration {}, using defaults: {}", path.display(), e);
                AutoModConfig::default()
            }
        }
    }

    fn guild_path(&self, guild_id: &str) -> Result<PathBuf> {
        let valid = !guild_id.is_empty()
            && guild_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(anyhow::anyhow!("Invalid guild id '{}'", guild_id));
        }
        Ok(self.config_dir.join(GUILDS_DIR).join(format!("{}.json", guild_id)))
    }

    /// Current settings for a guild (defaults when the guild has none)
    pub async fn get_guild_config(&self, guild_id: &str) -> AutoModConfig {
        self.guilds.read().await.get(guild_id).cloned().unwrap_or_default()
    }

    pub async fn get_bot_settings(&self) -> BotSettings {
        self.bot_settings.read().await.clone()
    }

    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }

    pub async fn save_guild_config(&self, guild_id: &str, config: AutoModConfig) -> Result<()> {
        self.validator.validate_guild_config(&config)?;

        let path = self.guild_path(guild_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(&path, content).await?;

        self.guilds.write().await.insert(guild_id.to_string(), config);
        let _ = self.change_notifier.send(ConfigChangeEvent::GuildUpdated {
            guild_id: guild_id.to_string(),
        });
        debug!("Saved guild configuration to {}", path.display());
        Ok(())
    }

    pub async fn save_bot_settings(&self, settings: BotSettings) -> Result<()> {
        self.validator.validate_bot_settings(&settings)?;

        fs::create_dir_all(&self.config_dir).await?;
        let path = self.config_dir.join(BOT_SETTINGS_FILE);
        let content = serde_yaml::to_string(&settings)?;
        fs::write(&path, content).await?;

        *self.bot_settings.write().await = settings;
        let _ = self.change_notifier.send(ConfigChangeEvent::BotSettingsUpdated);
        debug!("Saved bot settings to {}", path.display());
        Ok(())
    }

    /// Apply a change to one guild's document and flush it
    pub async fn update_guild<F>(&self, guild_id: &str, change: F) -> Result<AutoModConfig>
    where
        F: FnOnce(&mut AutoModConfig) -> Result<()>,
    {
        let _guard = self.update_lock.lock().await;
        let mut config = self.get_guild_config(guild_id).await;
        change(&mut config)?;
        self.save_guild_config(guild_id, config.clone()).await?;
        Ok(config)
    }

    // =================================================================
    // ADMINISTRATIVE MUTATIONS
    // =================================================================

    pub async fn set_enabled(&self, guild_id: &str, enabled: bool) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.enabled = enabled;
            Ok(())
        })
        .await?;
        info!("AutoMod {} for guild {}", if enabled { "enabled" } else { "disabled" }, guild_id);
        Ok(())
    }

    pub async fn set_log_channel(&self, guild_id: &str, channel_id: Option<String>) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.log_channel = channel_id;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Replace the trusted set. Entries are normalized to bare lower-case hosts.
    pub async fn set_trusted_domains(&self, guild_id: &str, domains: Vec<String>) -> Result<()> {
        let mut normalized: Vec<String> = Vec::with_capacity(domains.len());
        for domain in &domains {
            let host = normalize_domain(domain)
                .ok_or_else(|| anyhow::anyhow!("'{}' is not a valid domain", domain))?;
            if !normalized.contains(&host) {
                normalized.push(host);
            }
        }

        let count = normalized.len();
        self.update_guild(guild_id, |c| {
            c.trusted_domains = normalized;
            Ok(())
        })
        .await?;
        info!("Guild {} now trusts {} domains", guild_id, count);
        Ok(())
    }

    /// Returns false when the domain was already trusted
    pub async fn add_trusted_domain(&self, guild_id: &str, domain: &str) -> Result<bool> {
        let host = normalize_domain(domain).ok_or_else(|| anyhow::anyhow!("'{}' is not a valid domain", domain))?;
        let mut added = false;
        self.update_guild(guild_id, |c| {
            if !c.trusted_domains.contains(&host) {
                c.trusted_domains.push(host.clone());
                added = true;
            }
            Ok(())
        })
        .await?;
        Ok(added)
    }

    /// Returns false when the domain was not trusted
    pub async fn remove_trusted_domain(&self, guild_id: &str, domain: &str) -> Result<bool> {
        let host = normalize_domain(domain).ok_or_else(|| anyhow::anyhow!("'{}' is not a valid domain", domain))?;
        let mut removed = false;
        self.update_guild(guild_id, |c| {
            let before = c.trusted_domains.len();
            c.trusted_domains.retain(|d| d != &host);
            removed = c.trusted_domains.len() != before;
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    pub async fn set_rule_punishment(&self, guild_id: &str, rule: RuleKind, punishment: Punishment) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.rules.set_punishment(rule, punishment);
            Ok(())
        })
        .await?;
        info!("Guild {}: {} now punished with {}", guild_id, rule, punishment);
        Ok(())
    }

    pub async fn set_warning_limit(&self, guild_id: &str, limit: u32) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.warning_limit = limit;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn toggle_rule(&self, guild_id: &str, rule: RuleKind, enabled: bool) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.rules.set_enabled(rule, enabled);
            Ok(())
        })
        .await?;
        info!("Guild {}: rule '{}' {}", guild_id, rule, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub async fn set_whitelist(&self, guild_id: &str, roles: Vec<String>, channels: Vec<String>) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.whitelist = Whitelist { roles, channels };
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn add_whitelist_role(&self, guild_id: &str, role_id: &str) -> Result<()> {
        self.update_guild(guild_id, |c| {
            if !c.whitelist.roles.iter().any(|r| r == role_id) {
                c.whitelist.roles.push(role_id.to_string());
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn add_whitelist_channel(&self, guild_id: &str, channel_id: &str) -> Result<()> {
        self.update_guild(guild_id, |c| {
            if !c.whitelist.channels.iter().any(|ch| ch == channel_id) {
                c.whitelist.channels.push(channel_id.to_string());
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Replace the banned-word list, keeping order and dropping duplicates
    pub async fn set_banned_words(&self, guild_id: &str, words: Vec<String>) -> Result<()> {
        let mut cleaned: Vec<String> = Vec::with_capacity(words.len());
        for word in words {
            let word = word.trim().to_string();
            if !word.is_empty() && !cleaned.iter().any(|w| w.eq_ignore_ascii_case(&word)) {
                cleaned.push(word);
            }
        }

        self.update_guild(guild_id, |c| {
            c.rules.text_filter.banned_words = cleaned;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_spam_limits(&self, guild_id: &str, max_messages: u32, time_window_seconds: u64) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.rules.spam.max_messages = max_messages;
            c.rules.spam.time_window_seconds = time_window_seconds;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_caps_threshold(&self, guild_id: &str, threshold_ratio: f64, min_length: usize) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.rules.caps.threshold_ratio = threshold_ratio;
            c.rules.caps.min_length = min_length;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_emoji_limit(&self, guild_id: &str, max_emojis: usize) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.rules.emoji_spam.max_emojis = max_emojis;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_link_policy(&self, guild_id: &str, block_suspicious: bool, allow_trusted_only: bool) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.rules.link_filter.block_suspicious = block_suspicious;
            c.rules.link_filter.allow_trusted_only = allow_trusted_only;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_advertising_policy(&self, guild_id: &str, block_invites: bool, block_urls: bool) -> Result<()> {
        self.update_guild(guild_id, |c| {
            c.rules.advertising.block_invites = block_invites;
            c.rules.advertising.block_urls = block_urls;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn set_ban_log_channel(&self, channel_id: Option<String>) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        let mut settings = self.get_bot_settings().await;
        settings.ban_log_channel = channel_id;
        self.save_bot_settings(settings).await
    }

    // =================================================================
    // HOT RELOAD
    // =================================================================

    async fn setup_file_watchers(&self) -> Result<()> {
        let guilds = self.guilds.clone();
        let bot_settings = self.bot_settings.clone();
        let change_notifier = self.change_notifier.clone();
        let validator = self.validator.clone();

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
        })?;

        watcher.watch(&self.config_dir, RecursiveMode::Recursive)?;
        self.watchers.write().await.push(watcher);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                for path in event.paths {
                    let file = path.display().to_string();

                    if path.file_name().and_then(|n| n.to_str()) == Some(BOT_SETTINGS_FILE) {
                        match Self::read_bot_settings(&path, &validator).await {
                            Ok(settings) => {
                                *bot_settings.write().await = settings;
                                info!("Reloaded bot settings");
                                let _ = change_notifier.send(ConfigChangeEvent::BotSettingsUpdated);
                            }
                            Err(e) => {
                                error!("Failed to reload bot settings: {}", e);
                                let _ = change_notifier.send(ConfigChangeEvent::ValidationError { file, error: e.to_string() });
                            }
                        }
                    } else if let Some(guild_id) = guild_id_from_path(&path) {
                        // keep the last good document; a half-written file is followed by another event
                        match Self::parse_guild_document(&path, &validator).await {
                            Ok(config) => {
                                let changed = guilds.read().await.get(&guild_id) != Some(&config);
                                if changed {
                                    guilds.write().await.insert(guild_id.clone(), config);
                                    info!("Reloaded configuration for guild {}", guild_id);
                                    let _ = change_notifier.send(ConfigChangeEvent::GuildUpdated { guild_id });
                                }
                            }
                            Err(e) => {
                                warn!("Ignoring invalid edit to {}: {}", file, e);
                                let _ = change_notifier.send(ConfigChangeEvent::ValidationError { file, error: e.to_string() });
                            }
                        }
                    } else {
                        debug!("Ignoring change to non-config file: {}", file);
                    }
                }
            }
        });

        info!("File watchers setup for hot-reloading");
        Ok(())
    }
}

/// `<dir>/guilds/<id>.json` -> `<id>`
fn guild_id_from_path(path: &Path) -> Option<String> {
    let in_guilds_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n == GUILDS_DIR)
        .unwrap_or(false);
    if !in_guilds_dir || path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string())
}
