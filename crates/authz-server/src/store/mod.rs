//! Collaborator stores: registered clients, deny rules and the user directory.
//!
//! The protocol engine only sees the traits. Two backends exist, selected by
//! [`StoreBackend`]: an in-memory store seeded from a bootstrap document and a
//! file store that rewrites the same document on every change.

mod file;
mod memory;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::{Config, StoreBackend};
use crate::credentials;
use crate::error::{ConfigError, StoreError, StoreResult};
use crate::models::{DenyRule, MatchField, RegisteredClient, UserAccount};

/// Registered client lookups and administrative writes.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn find_by_client_id(&self, client_id: &str) -> StoreResult<Option<RegisteredClient>>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<RegisteredClient>>;

    /// Validate and persist a client, assigning an id when blank.
    async fn save(&self, client: RegisteredClient) -> StoreResult<RegisteredClient>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn list_all(&self) -> StoreResult<Vec<RegisteredClient>>;
}

/// Deny-rule lookups and administrative writes.
#[async_trait]
pub trait DenyRuleStore: Send + Sync {
    /// Enabled rules for `field` scoped to `provider`, the wildcard, or globally.
    async fn list_active_for(&self, provider: &str, field: MatchField)
    -> StoreResult<Vec<DenyRule>>;

    /// Normalize and persist a rule, assigning an id when blank.
    async fn save(&self, rule: DenyRule) -> StoreResult<DenyRule>;

    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn list_all(&self) -> StoreResult<Vec<DenyRule>>;
}

/// Resource-owner accounts for the local login form.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserAccount>>;

    async fn find_by_subject(&self, subject: &str) -> StoreResult<Option<UserAccount>>;

    async fn save(&self, account: UserAccount) -> StoreResult<UserAccount>;
}

/// Check a password against a looked-up account. Disabled accounts never
/// pass, and a missing account costs the same hashing work as a wrong
/// password.
pub async fn verify_password(account: Option<UserAccount>, password: &str) -> Option<UserAccount> {
    let Some(account) = account else {
        credentials::burn_verification(password).await;
        return None;
    };
    let verified = credentials::verify_secret_async(password, &account.password_hash).await;
    (verified && account.enabled).then_some(account)
}

/// The on-disk document shared by the bootstrap file and the file backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDocument {
    pub clients: Vec<RegisteredClient>,
    pub deny_rules: Vec<DenyRule>,
    pub users: Vec<UserAccount>,
}

impl StateDocument {
    /// Read a document from disk.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` or `StoreError::Serialization`.
    pub async fn load(path: &Path) -> StoreResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// The three collaborator stores handed to the protocol engine.
#[derive(Clone)]
pub struct Stores {
    pub clients: Arc<dyn ClientStore>,
    pub deny_rules: Arc<dyn DenyRuleStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    /// Share one backend across all three roles.
    #[must_use]
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ClientStore + DenyRuleStore + UserDirectory + 'static,
    {
        Self {
            clients: backend.clone(),
            deny_rules: backend.clone(),
            users: backend,
        }
    }

    /// Build the backend selected by configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the bootstrap document cannot be loaded or
    /// contains invalid records.
    pub async fn from_config(config: &Config) -> Result<Self, ConfigError> {
        match config.store_backend {
            StoreBackend::Memory => {
                let document = match &config.state_file {
                    Some(path) => StateDocument::load(path).await?,
                    None => StateDocument::default(),
                };
                let store = MemoryStore::from_document(document)?;
                tracing::info!(backend = "memory", "Collaborator stores initialised");
                Ok(Self::from_backend(Arc::new(store)))
            }
            StoreBackend::File => {
                let path = config.state_file.clone().ok_or_else(|| {
                    ConfigError::invalid("AUTHZ_STATE_FILE", "required for the file store backend")
                })?;
                let store = FileStore::open(path).await?;
                tracing::info!(backend = "file", "Collaborator stores initialised");
                Ok(Self::from_backend(Arc::new(store)))
            }
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish()
    }
}

/// Bound a store call. Expiry is reported as `StoreError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call).await.map_err(|_| StoreError::Timeout(limit))?
}
