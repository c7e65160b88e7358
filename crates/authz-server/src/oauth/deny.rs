//! Deny-list login gate.
//!
//! Runs after credentials are verified and before any session is
//! established. Fields are checked in priority order (email, username,
//! provider id) and the first matching rule decides.

use std::sync::Arc;
use std::time::Duration;

use regex::RegexBuilder;

use crate::error::StoreResult;
use crate::models::{DenyRule, LOCAL_PROVIDER, MatchField, MatchType, Principal, normalize_value};
use crate::store::{DenyRuleStore, with_timeout};

/// The identity attributes a login presents.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginIdentity<'a> {
    pub provider: Option<&'a str>,
    pub email: Option<&'a str>,
    pub username: Option<&'a str>,
    pub provider_id: Option<&'a str>,
}

impl<'a> LoginIdentity<'a> {
    #[must_use]
    pub fn from_principal(principal: &'a Principal) -> Self {
        Self {
            provider: Some(principal.provider.as_str()),
            email: principal.email.as_deref(),
            username: principal.username.as_deref(),
            provider_id: principal.provider_id.as_deref(),
        }
    }

    fn candidate(&self, field: MatchField) -> Option<&'a str> {
        let value = match field {
            MatchField::Email => self.email,
            MatchField::Username => self.username,
            MatchField::ProviderId => self.provider_id,
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Gate outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyDecision {
    Allow,
    Deny(Box<DenyRule>),
}

impl DenyDecision {
    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

#[derive(Clone)]
pub struct DenyListGate {
    rules: Arc<dyn DenyRuleStore>,
    timeout: Duration,
}

impl DenyListGate {
    #[must_use]
    pub fn new(rules: Arc<dyn DenyRuleStore>, timeout: Duration) -> Self {
        Self { rules, timeout }
    }

    /// Check an identity against the active rules.
    ///
    /// # Errors
    ///
    /// Propagates store failures and timeouts; the caller rejects the login.
    pub async fn check(&self, identity: LoginIdentity<'_>) -> StoreResult<DenyDecision> {
        let provider = identity
            .provider
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(LOCAL_PROVIDER);

        for field in MatchField::PRIORITY {
            let Some(candidate) = identity.candidate(field) else {
                continue;
            };
            let rules = with_timeout(self.timeout, self.rules.list_active_for(provider, field)).await?;
            if let Some(rule) = rules.into_iter().find(|rule| rule_matches(rule, candidate)) {
                tracing::debug!(rule_id = %rule.id, field = field.as_str(), "Deny rule matched");
                return Ok(DenyDecision::Deny(Box::new(rule)));
            }
        }
        Ok(DenyDecision::Allow)
    }

    /// Convenience wrapper for an established principal.
    pub async fn check_principal(&self, principal: &Principal) -> StoreResult<DenyDecision> {
        self.check(LoginIdentity::from_principal(principal)).await
    }
}

impl std::fmt::Debug for DenyListGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenyListGate").field("timeout", &self.timeout).finish()
    }
}

/// Match one rule. A malformed regex never matches.
#[must_use]
pub fn rule_matches(rule: &DenyRule, candidate: &str) -> bool {
    match rule.match_type {
        MatchType::Exact => normalize_value(candidate) == rule.exact_value(),
        MatchType::Regex => {
            let anchored = format!("^(?:{})$", rule.pattern);
            match RegexBuilder::new(&anchored).case_insensitive(true).build() {
                Ok(regex) => regex.is_match(candidate),
                Err(e) => {
                    tracing::warn!(
                        rule_id = %rule.id,
                        error = %e,
                        "Malformed deny-list regex ignored; fix the rule"
                    );
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn rule(field: MatchField, match_type: MatchType, pattern: &str) -> DenyRule {
        DenyRule {
            id: String::new(),
            enabled: true,
            provider: None,
            match_field: field,
            match_type,
            pattern: pattern.into(),
            normalized_value: None,
            reason: None,
        }
    }

    async fn gate_with(rules: Vec<DenyRule>) -> DenyListGate {
        let store = Arc::new(MemoryStore::new());
        for r in rules {
            DenyRuleStore::save(store.as_ref(), r).await.unwrap();
        }
        DenyListGate::new(store, Duration::from_secs(1))
    }

    fn email(value: &str) -> LoginIdentity<'_> {
        LoginIdentity { email: Some(value), ..LoginIdentity::default() }
    }

    #[tokio::test]
    async fn test_exact_email_normalized() {
        let gate = gate_with(vec![rule(MatchField::Email, MatchType::Exact, "blocked@example.com")]).await;
        assert!(gate.check(email("Blocked@Example.com ")).await.unwrap().is_denied());
        assert!(!gate.check(email("other@example.com")).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_regex_case_insensitive_full_match() {
        let gate = gate_with(vec![rule(MatchField::Email, MatchType::Regex, r".*@evil\.com")]).await;
        assert!(gate.check(email("Mallory@EVIL.com")).await.unwrap().is_denied());
        assert!(!gate.check(email("mallory@evil.com.au")).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_malformed_regex_never_denies() {
        let gate = gate_with(vec![rule(MatchField::Email, MatchType::Regex, "([unclosed")]).await;
        assert_eq!(gate.check(email("([unclosed")).await.unwrap(), DenyDecision::Allow);
    }

    #[tokio::test]
    async fn test_field_priority_first_match_wins() {
        let gate = gate_with(vec![
            rule(MatchField::Username, MatchType::Exact, "mallory"),
            rule(MatchField::Email, MatchType::Exact, "m@example.com"),
        ])
        .await;
        let identity = LoginIdentity {
            email: Some("m@example.com"),
            username: Some("mallory"),
            ..LoginIdentity::default()
        };
        let DenyDecision::Deny(matched) = gate.check(identity).await.unwrap() else {
            panic!("expected deny");
        };
        assert_eq!(matched.match_field, MatchField::Email);
    }

    #[tokio::test]
    async fn test_blank_candidates_skipped() {
        let gate = gate_with(vec![rule(MatchField::Username, MatchType::Regex, ".*")]).await;
        let identity = LoginIdentity { username: Some("   "), ..LoginIdentity::default() };
        assert!(!gate.check(identity).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_provider_scoped_rule() {
        let mut scoped = rule(MatchField::ProviderId, MatchType::Exact, "12345");
        scoped.provider = Some("github".into());
        let gate = gate_with(vec![scoped]).await;

        let github = LoginIdentity { provider: Some("github"), provider_id: Some("12345"), ..LoginIdentity::default() };
        let google = LoginIdentity { provider: Some("google"), provider_id: Some("12345"), ..LoginIdentity::default() };
        let local = LoginIdentity { provider_id: Some("12345"), ..LoginIdentity::default() };
        assert!(gate.check(github).await.unwrap().is_denied());
        assert!(!gate.check(google).await.unwrap().is_denied());
        assert!(!gate.check(local).await.unwrap().is_denied());
    }
}
