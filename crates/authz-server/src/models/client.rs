//! Registered client configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ScopeSet;
use crate::config::defaults;
use crate::credentials;
use crate::error::StoreError;

/// OAuth grant types the token endpoint understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

impl GrantType {
    /// Parse the `grant_type` form parameter.
    #[must_use]
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            "client_credentials" => Some(Self::ClientCredentials),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

/// Token endpoint client authentication methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

impl ClientAuthMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::None => "none",
        }
    }
}

/// Per-client token lifetimes and refresh policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub code_ttl_secs: u64,
    /// When false, every refresh rotates the refresh token.
    pub reuse_refresh_tokens: bool,
}

impl TokenSettings {
    #[must_use]
    pub const fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: defaults::ACCESS_TOKEN_TTL.as_secs(),
            refresh_token_ttl_secs: defaults::REFRESH_TOKEN_TTL.as_secs(),
            code_ttl_secs: defaults::CODE_TTL.as_secs(),
            reuse_refresh_tokens: false,
        }
    }
}

/// A client registered with the authorization server.
///
/// Read-only to the protocol engine; administrative writes go through the
/// `ClientStore`, which calls [`RegisteredClient::validate`] before saving.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Internal identifier, assigned on first save when blank.
    #[serde(default)]
    pub id: String,

    /// Public client identifier.
    pub client_id: String,

    #[serde(default)]
    pub client_name: Option<String>,

    /// Argon2 PHC string. `None` for public clients.
    #[serde(default)]
    pub client_secret_hash: Option<String>,

    pub grant_types: BTreeSet<GrantType>,

    pub auth_methods: BTreeSet<ClientAuthMethod>,

    #[serde(default)]
    pub redirect_uris: Vec<String>,

    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,

    #[serde(default)]
    pub scopes: ScopeSet,

    #[serde(default)]
    pub require_proof_key: bool,

    #[serde(default)]
    pub require_consent: bool,

    #[serde(default)]
    pub token_settings: TokenSettings,

    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

const fn enabled_default() -> bool {
    true
}

impl Default for RegisteredClient {
    fn default() -> Self {
        Self {
            id: String::new(),
            client_id: String::new(),
            client_name: None,
            client_secret_hash: None,
            grant_types: BTreeSet::new(),
            auth_methods: BTreeSet::new(),
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            scopes: ScopeSet::new(),
            require_proof_key: false,
            require_consent: false,
            token_settings: TokenSettings::default(),
            enabled: true,
        }
    }
}

impl RegisteredClient {
    /// Check the record invariants enforced on every save.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] describing the first violated invariant.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.client_id.trim().is_empty() {
            return Err(StoreError::invalid("client_id must not be blank"));
        }
        if self.grant_types.is_empty() {
            return Err(StoreError::invalid("at least one grant type is required"));
        }
        if self.auth_methods.is_empty() {
            return Err(StoreError::invalid("at least one client auth method is required"));
        }
        if self.auth_methods.contains(&ClientAuthMethod::None) {
            if self.client_secret_hash.is_some() {
                return Err(StoreError::invalid("public clients must not have a secret"));
            }
            if !self.require_proof_key {
                return Err(StoreError::invalid("public clients must require PKCE"));
            }
        }
        let needs_secret = self.auth_methods.iter().any(|m| *m != ClientAuthMethod::None);
        if needs_secret && self.client_secret_hash.is_none() {
            return Err(StoreError::invalid("confidential auth methods need a client secret"));
        }
        if self.grant_types.contains(&GrantType::AuthorizationCode) && self.redirect_uris.is_empty()
        {
            return Err(StoreError::invalid("authorization_code clients need a redirect URI"));
        }
        for uri in self.redirect_uris.iter().chain(&self.post_logout_redirect_uris) {
            let parsed = Url::parse(uri)
                .map_err(|e| StoreError::invalid(format!("redirect URI '{uri}' is not absolute: {e}")))?;
            if parsed.fragment().is_some() {
                return Err(StoreError::invalid(format!("redirect URI '{uri}' has a fragment")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    #[must_use]
    pub fn allows_auth_method(&self, method: ClientAuthMethod) -> bool {
        self.auth_methods.contains(&method)
    }

    /// True for clients that authenticate with `none`.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_secret_hash.is_none()
    }

    /// Verify a presented secret against the stored hash.
    pub async fn verify_secret(&self, presented: &str) -> bool {
        match self.client_secret_hash.as_deref() {
            Some(hash) => credentials::verify_secret_async(presented, hash).await,
            None => false,
        }
    }

    /// Display name, falling back to the client identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(&self.client_id)
    }
}

impl std::fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("grant_types", &self.grant_types)
            .field("auth_methods", &self.auth_methods)
            .field("redirect_uris", &self.redirect_uris)
            .field("scopes", &self.scopes)
            .field("enabled", &self.enabled)
            .finish()
    }
}
