//! Spam classification for inbound mail
//!
//! Dropping a legitimate financial or legal message costs far more than
//! keeping a marketing one, so every ambiguous case resolves to keep. Policy
//! lists are data (TOML), not code.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{sender_domain, Message};

/// Policy compiled into the binary
const DEFAULT_POLICY: &str = include_str!("../../../config/spam_policy.toml");

/// Environment variable pointing at a policy file
pub const SPAM_POLICY_ENV: &str = "MAILROOM_SPAM_POLICY";

/// Allow/deny lists driving the classifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpamPolicy {
    #[serde(default)]
    pub important_domains: Vec<String>,
    #[serde(default)]
    pub important_keywords: Vec<String>,
    #[serde(default)]
    pub spam_sender_patterns: Vec<String>,
    #[serde(default)]
    pub spam_keywords: Vec<String>,
}

impl SpamPolicy {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut policy: SpamPolicy = toml::from_str(content)?;
        policy.normalize();
        Ok(policy)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Embedded default policy
    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(DEFAULT_POLICY)
    }

    /// Default location of the user override file
    pub fn override_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("mailroom").join("config").join("spam_policy.toml"))
    }

    /// Load the active policy: `MAILROOM_SPAM_POLICY`, then the data dir override,
    /// then the embedded default
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(SPAM_POLICY_ENV) {
            info!("Loading spam policy from {}", path);
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = Self::override_path().filter(|p| p.exists()) {
            info!("Loading spam policy override from {}", path.display());
            return Self::from_file(&path);
        }

        Self::embedded()
    }

    fn normalize(&mut self) {
        for list in [
            &mut self.important_domains,
            &mut self.important_keywords,
            &mut self.spam_sender_patterns,
            &mut self.spam_keywords,
        ] {
            *list = list
                .iter()
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
}

/// Classification outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpamVerdict {
    pub keep: bool,
    pub reason: String,
    pub confidence: f64,
}

impl SpamVerdict {
    fn keep(reason: String, confidence: f64) -> Self {
        Self {
            keep: true,
            reason,
            confidence,
        }
    }
}

/// Keep/drop decision for inbound mail
#[derive(Debug, Clone)]
pub struct SpamClassifier {
    policy: SpamPolicy,
}

impl SpamClassifier {
    pub fn new(mut policy: SpamPolicy) -> Self {
        policy.normalize();
        Self { policy }
    }

    pub fn policy(&self) -> &SpamPolicy {
        &self.policy
    }

    pub fn classify_message(&self, message: &Message) -> SpamVerdict {
        self.classify(&message.sender, &message.subject)
    }

    /// Classify by sender and subject, first matching rule wins
    pub fn classify(&self, sender: &str, subject: &str) -> SpamVerdict {
        let domain = sender_domain(sender);
        let sender_lower = sender.to_lowercase();
        let subject_lower = subject.to_lowercase();

        if let Some(important) = self
            .policy
            .important_domains
            .iter()
            .find(|d| domain_matches(&domain, d))
        {
            return SpamVerdict::keep(format!("important sender domain: {}", important), 0.95);
        }

        if let Some(keyword) = self
            .policy
            .important_keywords
            .iter()
            .find(|k| subject_lower.contains(k.as_str()))
        {
            return SpamVerdict::keep(format!("important keyword in subject: {}", keyword), 0.9);
        }

        let spam_signal = self
            .policy
            .spam_sender_patterns
            .iter()
            .find(|p| sender_lower.contains(p.as_str()))
            .map(|p| format!("marketing sender pattern: {}", p))
            .or_else(|| {
                self.policy
                    .spam_keywords
                    .iter()
                    .find(|k| subject_lower.contains(k.as_str()))
                    .map(|k| format!("spam keyword in subject: {}", k))
            });

        if let Some(reason) = spam_signal {
            debug!(sender = %sender, reason = %reason, "Message classified as spam");
            return SpamVerdict {
                keep: false,
                reason,
                confidence: 0.6,
            };
        }

        SpamVerdict::keep("no spam signals".to_string(), 0.5)
    }
}

/// Exact match or subdomain (`mail.chase.com` matches `chase.com`)
fn domain_matches(domain: &str, pattern: &str) -> bool {
    domain == pattern
        || domain
            .strip_suffix(pattern)
            .map(|prefix| prefix.ends_with('.'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SpamClassifier {
        SpamClassifier::new(SpamPolicy::embedded().unwrap())
    }

    #[test]
    fn test_embedded_policy_loads() {
        let policy = SpamPolicy::embedded().unwrap();
        assert!(policy.important_domains.contains(&"chase.com".to_string()));
        assert!(policy.important_keywords.contains(&"invoice".to_string()));
        assert!(!policy.spam_sender_patterns.is_empty());
    }

    #[test]
    fn test_important_domain_always_kept() {
        let c = classifier();
        for subject in ["50% off everything!", "Flash sale", "newsletter", ""] {
            let v = c.classify("Promo Team <promo@alerts.chase.com>", subject);
            assert!(v.keep, "subject {:?} should be kept", subject);
            assert!(v.reason.contains("chase.com"));
        }
    }

    #[test]
    fn test_keyword_overrides_spam_sender() {
        let c = classifier();
        let v = c.classify("noreply@retailer.com", "Your invoice #4521 is attached");
        assert!(v.keep);
        assert!(v.reason.contains("invoice"));
        assert_eq!(v.confidence, 0.9);
    }

    #[test]
    fn test_keyword_overrides_spam_subject() {
        let c = classifier();
        let v = c.classify("deals@shop.example", "Payment received - 20% off your next order");
        assert!(v.keep);
    }

    #[test]
    fn test_marketing_sender_dropped() {
        let c = classifier();
        let v = c.classify("newsletter@shop.example", "What's new this week");
        assert!(!v.keep);
        assert_eq!(v.confidence, 0.6);

        let v = c.classify("jane@shop.example", "Flash sale ends tonight");
        assert!(!v.keep);
        assert!(v.reason.contains("flash sale"));
    }

    #[test]
    fn test_default_keep() {
        let c = classifier();
        let v = c.classify("jane@customer.example", "Container ETA?");
        assert!(v.keep);
        assert_eq!(v.confidence, 0.5);
    }

    #[test]
    fn test_domain_match_requires_label_boundary() {
        assert!(domain_matches("chase.com", "chase.com"));
        assert!(domain_matches("mail.chase.com", "chase.com"));
        assert!(!domain_matches("notchase.com", "chase.com"));
        assert!(domain_matches("sat.gob.mx", "gob.mx"));
    }

    #[test]
    fn test_custom_policy_normalized() {
        let policy = SpamPolicy::from_toml_str(
            r#"
            important_domains = [".Partner.Example"]
            spam_keywords = ["  WEBINAR "]
            "#,
        )
        .unwrap();
        let c = SpamClassifier::new(policy);
        assert!(c.classify("x@eu.partner.example", "Webinar invite").keep);
        assert!(!c.classify("x@other.example", "Join our webinar").keep);
    }

    #[test]
    fn test_policy_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "spam_sender_patterns = [\"bulk\"]\n").unwrap();
        let c = SpamClassifier::new(SpamPolicy::from_file(&path).unwrap());
        assert!(!c.classify("bulk@lists.example", "hello").keep);
    }
}
