// src/bot/rules.rs - Ordered rule chain run against every inbound message

use anyhow::Result;
use log::debug;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::bot::domain::{DomainClassifier, DomainPolicy};
use crate::bot::spam_window::SpamTracker;
use crate::config::{AdvertisingRule, AutoModConfig, CapsRule, EmojiSpamRule, LinkFilterRule, SpamRule};
use crate::types::{ChatMessage, DomainVerdict, RuleKind, Violation};

const INVITE_PATTERN: &str =
    r"(?i)(?:https?://)?(?:www\.)?(?:discord\.gg|discord(?:app)?\.com/invite|dsc\.gg)/[a-z0-9-]+";
/// A candidate that is nothing but an invite belongs to the advertising rule
const INVITE_ONLY_PATTERN: &str =
    r"(?i)^(?:https?://)?(?:www\.)?(?:discord\.gg|discord(?:app)?\.com/invite|dsc\.gg)/[a-z0-9-]+/?$";
const URL_PATTERN: &str = r"(?i)(?:https?://|www\.)[^\s<>]+";
const SCHEME_URL_PATTERN: &str = r"(?i)\b[a-z][a-z0-9+.-]*://[^\s<>]+";
const BARE_DOMAIN_PATTERN: &str = r"(?i)\b(?:(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9-]{0,61}[a-z0-9]|(?:\d{1,3}\.){3}\d{1,3})(?::\d{1,5})?\b(?:/[^\s<>]*)?";
const CUSTOM_EMOJI_PATTERN: &str = r"<a?:[A-Za-z0-9_~]{2,32}:\d{15,21}>";

pub struct RuleEvaluator {
    classifier: DomainClassifier,
    invite_pattern: Regex,
    invite_only_pattern: Regex,
    url_pattern: Regex,
    scheme_url_pattern: Regex,
    bare_domain_pattern: Regex,
    emoji_pattern: Regex,
}

impl RuleEvaluator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            classifier: DomainClassifier::new(),
            invite_pattern: Regex::new(INVITE_PATTERN)?,
            invite_only_pattern: Regex::new(INVITE_ONLY_PATTERN)?,
            url_pattern: Regex::new(URL_PATTERN)?,
            scheme_url_pattern: Regex::new(SCHEME_URL_PATTERN)?,
            bare_domain_pattern: Regex::new(BARE_DOMAIN_PATTERN)?,
            emoji_pattern: Regex::new(CUSTOM_EMOJI_PATTERN)?,
        })
    }

    pub fn classifier(&self) -> &DomainClassifier {
        &self.classifier
    }

    /// Run the chain in fixed order; the first rule that fires wins.
    /// Whitelisted roles and channels skip everything but the link filter.
    pub async fn evaluate(
        &self,
        message: &ChatMessage,
        config: &AutoModConfig,
        spam: &SpamTracker,
    ) -> Option<Violation> {
        let whitelisted = config.whitelist.exempts(message);
        let content = message.content.as_str();

        for rule in RuleKind::ALL {
            if !config.rules.is_enabled(rule) {
                continue;
            }
            if whitelisted && rule.honours_whitelist() {
                continue;
            }

            let details = match rule {
                RuleKind::Spam => Self::check_spam(message, &config.rules.spam, spam).await,
                RuleKind::Advertising => self.check_advertising(content, &config.rules.advertising),
                RuleKind::LinkFilter => self.check_links(content, &config.rules.link_filter, &config.trusted_domains),
                RuleKind::TextFilter => Self::check_banned_words(content, &config.rules.text_filter.banned_words),
                RuleKind::Caps => Self::check_caps(content, &config.rules.caps),
                RuleKind::EmojiSpam => self.check_emoji_spam(content, &config.rules.emoji_spam),
            };

            if let Some(details) = details {
                debug!("Rule '{}' fired for {}: {}", rule, message.author_id, details);
                return Some(Violation {
                    rule,
                    details,
                    punishment: config.rules.punishment(rule),
                });
            }
        }

        None
    }

    async fn check_spam(message: &ChatMessage, rule: &SpamRule, spam: &SpamTracker) -> Option<String> {
        let threshold = usize::try_from(rule.max_messages).unwrap_or(usize::MAX);
        spam.claim_burst(message, rule.time_window_seconds, threshold)
            .await
            .map(|count| format!("Sent {} messages within {} seconds", count, rule.time_window_seconds))
    }

    fn check_advertising(&self, content: &str, rule: &AdvertisingRule) -> Option<String> {
        if !rule.block_invites && !rule.block_urls {
            return None;
        }

        let lower = content.to_lowercase();
        if !(lower.contains("discord") || lower.contains("dsc.gg") || lower.contains("http") || lower.contains("www.")) {
            return None;
        }

        if rule.block_invites {
            if let Some(invite) = self.invite_pattern.find(content) {
                return Some(format!("Server invite link: {}", invite.as_str()));
            }
        }

        if rule.block_urls {
            if let Some(url) = self.url_pattern.find(content) {
                return Some(format!("External link: {}", url.as_str()));
            }
        }

        None
    }

    fn check_links(&self, content: &str, rule: &LinkFilterRule, trusted: &[String]) -> Option<String> {
        if !content.contains('.') && !content.contains("://") {
            return None;
        }

        let policy = DomainPolicy {
            trusted,
            shorteners: &rule.shorteners,
        };

        for candidate in self.extract_link_candidates(content) {
            match self.classifier.classify(&candidate, &policy) {
                DomainVerdict::Trusted => continue,
                _ if rule.allow_trusted_only => {
                    return Some(format!("Link to a domain that is not trusted: {}", candidate));
                }
                DomainVerdict::Suspicious if rule.block_suspicious => {
                    return Some(format!("Suspicious link: {}", candidate));
                }
                _ => {}
            }
        }

        None
    }

    /// Scheme-prefixed URLs and bare domains outside them, in message order.
    /// Duplicates and bare invite links (owned by the advertising rule) are dropped.
    pub fn extract_link_candidates(&self, content: &str) -> Vec<String> {
        let trim = |s: &str| s.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'', '"']).to_string();

        let mut found: Vec<(usize, String)> = Vec::new();
        let mut masked = content.to_string();
        for m in self.scheme_url_pattern.find_iter(content) {
            found.push((m.start(), trim(m.as_str())));
            // same byte length keeps offsets of the bare matches aligned
            masked.replace_range(m.range(), &" ".repeat(m.len()));
        }
        found.extend(
            self.bare_domain_pattern
                .find_iter(&masked)
                .map(|m| (m.start(), trim(m.as_str()))),
        );
        found.sort_by_key(|(start, _)| *start);

        let mut unique: Vec<String> = Vec::with_capacity(found.len());
        for (_, candidate) in found {
            if candidate.is_empty() || self.invite_only_pattern.is_match(&candidate) || unique.contains(&candidate) {
                continue;
            }
            unique.push(candidate);
        }
        unique
    }

    fn check_banned_words(content: &str, banned_words: &[String]) -> Option<String> {
        if banned_words.is_empty() {
            return None;
        }

        let normalized: String = content.nfkc().collect::<String>().to_lowercase();
        banned_words
            .iter()
            .find(|word| {
                let word: String = word.nfkc().collect::<String>().to_lowercase();
                !word.is_empty() && normalized.contains(&word)
            })
            .map(|word| format!("Banned word: {}", word))
    }

    fn check_caps(content: &str, rule: &CapsRule) -> Option<String> {
        let length = content.chars().count();
        if length == 0 || length < rule.min_length {
            return None;
        }

        let uppercase = content.chars().filter(|c| c.is_uppercase()).count();
        let ratio = uppercase as f64 / length as f64;
        if ratio >= rule.threshold_ratio {
            Some(format!("{:.0}% of the message is uppercase", ratio * 100.0))
        } else {
            None
        }
    }

    fn check_emoji_spam(&self, content: &str, rule: &EmojiSpamRule) -> Option<String> {
        if !content.contains('<') || !content.contains('>') {
            return None;
        }

        let count = self.emoji_pattern.find_iter(content).count();
        if count > rule.max_emojis {
            Some(format!("{} custom emojis (limit {})", count, rule.max_emojis))
        } else {
            None
        }
    }
}
