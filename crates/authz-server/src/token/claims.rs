//! JWT claim sets and the claims customization hook.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::models::{GrantType, Principal, PrincipalKind, RegisteredClient, format_scope, parse_scope};

/// A mutable JWT claim set.
pub type Claims = Map<String, Value>;

/// Which token a claim set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    AccessToken,
    IdToken,
}

/// Inputs available to a [`ClaimsCustomizer`].
#[derive(Debug, Clone, Copy)]
pub struct ClaimsContext<'a> {
    pub principal: &'a Principal,
    pub client: &'a RegisteredClient,
    pub kind: TokenKind,
    pub grant: GrantType,
}

/// Last step before a claim set is signed. Must be a pure function of its
/// inputs.
pub trait ClaimsCustomizer: Send + Sync {
    fn customize(&self, ctx: &ClaimsContext<'_>, claims: Claims) -> Claims;
}

/// Leaves claims untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCustomizer;

impl ClaimsCustomizer for NoopCustomizer {
    fn customize(&self, _ctx: &ClaimsContext<'_>, claims: Claims) -> Claims {
        claims
    }
}

/// Adds the self-service scopes to every end-user access token, plus the
/// administrative scope for principals holding the admin role.
#[derive(Debug, Clone)]
pub struct SelfServiceScopesCustomizer {
    scopes: Vec<String>,
    admin_role: String,
    admin_scope: String,
}

impl SelfServiceScopesCustomizer {
    #[must_use]
    pub fn new(scopes: Vec<String>, admin_role: impl Into<String>, admin_scope: impl Into<String>) -> Self {
        Self { scopes, admin_role: admin_role.into(), admin_scope: admin_scope.into() }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.self_service_scopes.clone(),
            config.admin_role.clone(),
            config.admin_scope.clone(),
        )
    }
}

impl ClaimsCustomizer for SelfServiceScopesCustomizer {
    fn customize(&self, ctx: &ClaimsContext<'_>, mut claims: Claims) -> Claims {
        if ctx.kind != TokenKind::AccessToken || ctx.principal.kind != PrincipalKind::User {
            return claims;
        }

        let mut scopes = parse_scope(claims.get("scope").and_then(Value::as_str).unwrap_or_default());
        scopes.extend(self.scopes.iter().cloned());
        if ctx.principal.has_role(&self.admin_role) {
            scopes.insert(self.admin_scope.clone());
        }
        if !scopes.is_empty() {
            claims.insert("scope".into(), Value::String(format_scope(&scopes)));
        }
        claims
    }
}

/// Claims read back from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl AccessTokenClaims {
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.as_deref().is_some_and(|s| s.split_whitespace().any(|s| s == scope))
    }
}
