//! Data models for the authorization server.
//!
//! Records that live in collaborator stores use snake_case serde names so the
//! bootstrap document and the file backend share one format.

mod client;
mod deny_rule;
mod principal;
mod scope;

pub use client::{ClientAuthMethod, GrantType, RegisteredClient, TokenSettings};
pub use deny_rule::{DenyRule, MatchField, MatchType, normalize_value};
pub use principal::{Principal, PrincipalKind, UserAccount, LOCAL_PROVIDER};
pub use scope::{OPENID, ScopeSet, format_scope, parse_scope};
