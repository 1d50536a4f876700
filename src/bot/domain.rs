// src/bot/domain.rs - URL trust classification for the link filter

use anyhow::Result;
use log::{debug, error};
use regex::Regex;
use url::{Host, Url};

use crate::types::DomainVerdict;

/// Shortener hosts hide the real destination, so they are never taken at face value
pub const DEFAULT_SHORTENERS: &[&str] = &[
    "bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly", "is.gd", "buff.ly",
    "adf.ly", "cutt.ly", "shorturl.at", "rb.gy", "tiny.cc", "rebrand.ly", "t.ly",
];

/// Host patterns that mark a link as suspicious on their own
const SUSPICIOUS_HOST_PATTERNS: &[&str] = &[
    // high-risk TLDs
    r"\.(?:tk|ml|ga|cf|gq|xyz|top|click|country|stream|download|loan|work|zip|mov)$",
    // nitro giveaway lures
    r"(?:free|gift|claim)[-.]?n[i1l]tr[o0]",
    // platform lookalikes
    r"d[i1l]s[ck][o0]r[dcl][-.]?(?:gift|nitro|promo)s?",
    r"(?:^|\.)(?:login|verify|account|secure)[-.](?:steam|discord|paypal)",
    // punycode labels (homoglyph domains)
    r"(?:^|\.)xn--",
];

const MAX_HOST_LENGTH: usize = 50;
const MAX_HOST_DOTS: usize = 3;
const MAX_DIGIT_FRACTION: f64 = 0.3;

/// Host extracted from a URL candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedHost {
    Domain(String),
    IpLiteral(String),
}

impl ParsedHost {
    pub fn as_str(&self) -> &str {
        match self {
            ParsedHost::Domain(host) | ParsedHost::IpLiteral(host) => host,
        }
    }
}

/// Parse a raw URL or bare domain (`bit.ly/x`) and return its normalized host:
/// lower-case, no leading `www.`, no trailing dot.
pub fn extract_host(raw: &str) -> Result<ParsedHost> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&candidate)?;
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_lowercase();
            let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
            if domain.is_empty() {
                return Err(anyhow::anyhow!("URL '{}' has an empty host", raw));
            }
            Ok(ParsedHost::Domain(domain))
        }
        Some(Host::Ipv4(ip)) => Ok(ParsedHost::IpLiteral(ip.to_string())),
        Some(Host::Ipv6(ip)) => Ok(ParsedHost::IpLiteral(ip.to_string())),
        None => Err(anyhow::anyhow!("URL '{}' has no host", raw)),
    }
}

/// Normalize an admin-supplied domain (`https://www.Example.com/path` -> `example.com`)
pub fn normalize_domain(input: &str) -> Option<String> {
    extract_host(input).ok().map(|host| host.as_str().to_string())
}

/// `host` is trusted when it equals an entry or is a subdomain of one
pub fn is_trusted_host(host: &str, trusted: &[String]) -> bool {
    trusted.iter().any(|entry| {
        let entry = entry.trim().to_lowercase();
        !entry.is_empty() && (host == entry || host.ends_with(&format!(".{}", entry)))
    })
}

/// Per-guild inputs to classification
#[derive(Debug, Clone, Copy)]
pub struct DomainPolicy<'a> {
    pub trusted: &'a [String],
    pub shorteners: &'a [String],
}

pub struct DomainClassifier {
    suspicious_patterns: Vec<Regex>,
}

impl DomainClassifier {
    pub fn new() -> Self {
        let suspicious_patterns = SUSPICIOUS_HOST_PATTERNS
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    error!("Invalid suspicious host pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        Self { suspicious_patterns }
    }

    /// Classify a URL. Trust is checked first and always wins; anything that
    /// cannot be parsed is treated as suspicious.
    pub fn classify(&self, raw_url: &str, policy: &DomainPolicy<'_>) -> DomainVerdict {
        let host = match extract_host(raw_url) {
            Ok(host) => host,
            Err(e) => {
                debug!("Could not parse '{}', treating as suspicious: {}", raw_url, e);
                return DomainVerdict::Suspicious;
            }
        };

        if is_trusted_host(host.as_str(), policy.trusted) {
            return DomainVerdict::Trusted;
        }

        match self.suspicion_reason(&host, policy.shorteners) {
            Some(reason) => {
                debug!("'{}' is suspicious: {}", host.as_str(), reason);
                DomainVerdict::Suspicious
            }
            None => DomainVerdict::Neutral,
        }
    }

    fn suspicion_reason(&self, host: &ParsedHost, shorteners: &[String]) -> Option<&'static str> {
        let name = host.as_str();

        if self.suspicious_patterns.iter().any(|pattern| pattern.is_match(name)) {
            return Some("matches a suspicious pattern");
        }

        if matches!(host, ParsedHost::IpLiteral(_)) {
            return Some("IP address host");
        }

        if is_trusted_host(name, shorteners) {
            return Some("link shortener");
        }

        if name.len() > MAX_HOST_LENGTH || name.matches('.').count() > MAX_HOST_DOTS {
            return Some("unusually long or deeply nested host");
        }

        let digits = name.chars().filter(|c| c.is_ascii_digit()).count();
        if digits as f64 / name.len() as f64 > MAX_DIGIT_FRACTION {
            return Some("digit-heavy host");
        }

        None
    }
}

impl Default for DomainClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn classify(raw: &str, trusted: &[&str]) -> DomainVerdict {
        let trusted = strings(trusted);
        let shorteners = strings(DEFAULT_SHORTENERS);
        let policy = DomainPolicy { trusted: &trusted, shorteners: &shorteners };
        DomainClassifier::new().classify(raw, &policy)
    }

    #[test]
    fn test_trust_wins_over_suspicion() {
        assert_eq!(classify("https://evil.xyz/free", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("https://evil.xyz/free", &["evil.xyz"]), DomainVerdict::Trusted);
        assert_eq!(classify("bit.ly/abc", &["bit.ly"]), DomainVerdict::Trusted);
    }

    #[test]
    fn test_suffix_trust() {
        assert_eq!(classify("mail.google.com", &["google.com"]), DomainVerdict::Trusted);
        assert_eq!(classify("https://WWW.GitHub.com/rust-lang", &["github.com"]), DomainVerdict::Trusted);
        assert_ne!(classify("notgoogle.com", &["google.com"]), DomainVerdict::Trusted);
    }

    #[test]
    fn test_unparsable_fails_closed() {
        assert_eq!(classify("https://", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("http://[::1", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("https://exa mple.com", &[]), DomainVerdict::Suspicious);
    }

    #[test]
    fn test_heuristics() {
        assert_eq!(classify("http://192.168.0.1/login", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("http://[2001:db8::1]/", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("bit.ly/3xYz", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("https://a.b.c.d.example.com", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify(&format!("{}.com", "a".repeat(48)), &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("a1b2c3d4.com", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("free-nitro-gift.com", &[]), DomainVerdict::Suspicious);
        assert_eq!(classify("https://xn--dscord-5ya.com", &[]), DomainVerdict::Suspicious);
    }

    #[test]
    fn test_plain_domains_are_neutral() {
        assert_eq!(classify("https://example.com/page?x=1", &[]), DomainVerdict::Neutral);
        assert_eq!(classify("docs.rs", &[]), DomainVerdict::Neutral);
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://www.Example.com/path"), Some("example.com".to_string()));
        assert_eq!(normalize_domain("Sub.Example.org."), Some("sub.example.org".to_string()));
        assert_eq!(normalize_domain("   "), None);
    }
}
