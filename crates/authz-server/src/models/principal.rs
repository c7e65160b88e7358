//! Authenticated principals and directory accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider name for username/password logins against the local directory.
pub const LOCAL_PROVIDER: &str = "local";

/// Whether a principal is an end user or a client acting for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Client,
}

/// The authenticated subject of an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub username: Option<String>,
    pub email: Option<String>,
    /// Identity provider; `local` for directory logins.
    pub provider: String,
    /// Subject identifier at the upstream provider.
    pub provider_id: Option<String>,
    pub roles: Vec<String>,
    pub auth_time: DateTime<Utc>,
    pub kind: PrincipalKind,
}

impl Principal {
    /// Principal for a `client_credentials` grant.
    #[must_use]
    pub fn for_client(client_id: &str) -> Self {
        Self {
            subject: client_id.to_string(),
            username: None,
            email: None,
            provider: LOCAL_PROVIDER.to_string(),
            provider_id: None,
            roles: Vec::new(),
            auth_time: Utc::now(),
            kind: PrincipalKind::Client,
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A resource owner known to the local user directory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub subject: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Argon2 PHC string.
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

const fn enabled_default() -> bool {
    true
}

impl UserAccount {
    /// Principal for a fresh local login.
    #[must_use]
    pub fn to_principal(&self) -> Principal {
        Principal {
            subject: self.subject.clone(),
            username: Some(self.username.clone()),
            email: self.email.clone(),
            provider: LOCAL_PROVIDER.to_string(),
            provider_id: None,
            roles: self.roles.clone(),
            auth_time: Utc::now(),
            kind: PrincipalKind::User,
        }
    }
}

impl std::fmt::Debug for UserAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAccount")
            .field("subject", &self.subject)
            .field("username", &self.username)
            .field("roles", &self.roles)
            .field("enabled", &self.enabled)
            .finish()
    }
}
