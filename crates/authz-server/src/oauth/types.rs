//! Protocol records held by the authorization server.

use std::time::{Duration, Instant};

use serde::Deserialize;

use super::flow::AuthorizationState;
use super::pkce::CodeChallengeMethod;
use crate::models::{Principal, ScopeSet};

/// Raw `/oauth2/authorize` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// An authorization request that passed validation against its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub client_id: String,
    /// Where the response goes: the request's URI verbatim, or the single
    /// registered URI when the request omitted it.
    pub redirect_uri: String,
    /// Whether the request carried `redirect_uri`; if so the token request
    /// must repeat it.
    pub redirect_uri_supplied: bool,
    pub scopes: ScopeSet,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
}

/// An in-flight browser authorization (login and consent).
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    pub id: String,
    pub request: ValidatedRequest,
    pub state: AuthorizationState,
    pub created_at: Instant,
    pub lifetime: Duration,
}

impl AuthorizationFlow {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.lifetime
    }
}

/// A signed access token minted from a grant, tracked for revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAccessToken {
    pub jti: String,
    /// Unix seconds.
    pub expires_at: i64,
}

/// An issued authorization code. Stored under the SHA-256 digest of its value.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub request: ValidatedRequest,
    pub principal: Principal,
    /// Scopes granted at consent; a subset of the requested scopes.
    pub scopes: ScopeSet,
    pub state: AuthorizationState,
    pub issued_at: Instant,
    pub lifetime: Duration,
    /// Tokens minted from this code, revoked if the code is replayed.
    pub refresh_digest: Option<String>,
    pub access_tokens: Vec<IssuedAccessToken>,
}

impl AuthorizationCode {
    /// Check if the code has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() > self.lifetime
    }
}

/// A persisted refresh token. Stored under the SHA-256 digest of its value.
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub client_id: String,
    pub principal: Principal,
    /// Scopes of the original grant; refreshes may narrow but never widen.
    pub scopes: ScopeSet,
    pub nonce: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
    pub access_tokens: Vec<IssuedAccessToken>,
    /// Digest of the token that replaced this one on rotation.
    pub replaced_by: Option<String>,
    pub revoked: bool,
}

impl RefreshRecord {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.expires_at
    }

    /// Usable for a refresh grant.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.revoked && self.replaced_by.is_none() && !self.is_expired()
    }
}
