//! Login deny-list rules.

use serde::{Deserialize, Serialize};

/// Identity attribute a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchField {
    Email,
    Username,
    ProviderId,
}

impl MatchField {
    /// Evaluation order: the first field with a matching rule decides.
    pub const PRIORITY: [Self; 3] = [Self::Email, Self::Username, Self::ProviderId];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Username => "USERNAME",
            Self::ProviderId => "PROVIDER_ID",
        }
    }
}

/// How a rule's pattern is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    Regex,
}

impl MatchType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::Regex => "REGEX",
        }
    }
}

/// A rule that blocks login for matching identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyRule {
    #[serde(default)]
    pub id: String,

    #[serde(default = "enabled_default")]
    pub enabled: bool,

    /// `None` applies to every provider, as does `"*"`.
    #[serde(default)]
    pub provider: Option<String>,

    pub match_field: MatchField,

    pub match_type: MatchType,

    pub pattern: String,

    /// Trimmed, lower-cased pattern; maintained by the store for EXACT rules.
    #[serde(default)]
    pub normalized_value: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,
}

const fn enabled_default() -> bool {
    true
}

impl DenyRule {
    /// True when the rule is scoped to `provider`, globally, or by wildcard.
    #[must_use]
    pub fn applies_to_provider(&self, provider: &str) -> bool {
        match self.provider.as_deref().map(str::trim) {
            None | Some("" | "*") => true,
            Some(scoped) => scoped.eq_ignore_ascii_case(provider),
        }
    }

    /// The value EXACT rules compare against.
    #[must_use]
    pub fn exact_value(&self) -> String {
        self.normalized_value
            .clone()
            .unwrap_or_else(|| normalize_value(&self.pattern))
    }

    /// Refresh derived fields before persisting.
    pub fn normalize(&mut self) {
        self.normalized_value = match self.match_type {
            MatchType::Exact => Some(normalize_value(&self.pattern)),
            MatchType::Regex => None,
        };
    }
}

/// Canonical form for EXACT comparisons.
#[must_use]
pub fn normalize_value(value: &str) -> String {
    value.trim().to_lowercase()
}
