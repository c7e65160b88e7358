//! In-memory collaborator store seeded from a bootstrap document.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ClientStore, DenyRuleStore, StateDocument, UserDirectory};
use crate::error::{StoreError, StoreResult};
use crate::models::{DenyRule, MatchField, RegisteredClient, UserAccount};

/// Clients keyed by internal id, rules by id, users by subject.
#[derive(Clone, Default)]
pub struct MemoryStore {
    clients: Arc<RwLock<HashMap<String, RegisteredClient>>>,
    deny_rules: Arc<RwLock<HashMap<String, DenyRule>>>,
    users: Arc<RwLock<HashMap<String, UserAccount>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store, validating every record the way `save` would.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Invalid` for the first record that fails validation.
    pub fn from_document(document: StateDocument) -> StoreResult<Self> {
        let mut clients = HashMap::new();
        for client in document.clients {
            let client = prepare_client(client)?;
            clients.insert(client.id.clone(), client);
        }
        let mut deny_rules = HashMap::new();
        for rule in document.deny_rules {
            let rule = prepare_rule(rule);
            deny_rules.insert(rule.id.clone(), rule);
        }
        let mut users = HashMap::new();
        for user in document.users {
            if user.subject.trim().is_empty() || user.username.trim().is_empty() {
                return Err(StoreError::invalid("users need a subject and a username"));
            }
            users.insert(user.subject.clone(), user);
        }
        tracing::debug!(
            clients = clients.len(),
            deny_rules = deny_rules.len(),
            users = users.len(),
            "Seeded in-memory store"
        );
        Ok(Self {
            clients: Arc::new(RwLock::new(clients)),
            deny_rules: Arc::new(RwLock::new(deny_rules)),
            users: Arc::new(RwLock::new(users)),
        })
    }

    /// Snapshot every record, sorted for stable output.
    pub async fn snapshot(&self) -> StateDocument {
        let mut clients: Vec<_> = self.clients.read().await.values().cloned().collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        let mut deny_rules: Vec<_> = self.deny_rules.read().await.values().cloned().collect();
        deny_rules.sort_by(|a, b| a.id.cmp(&b.id));
        let mut users: Vec<_> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.subject.cmp(&b.subject));
        StateDocument { clients, deny_rules, users }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(super) fn prepare_client(mut client: RegisteredClient) -> StoreResult<RegisteredClient> {
    client.validate()?;
    if client.id.trim().is_empty() {
        client.id = new_id();
    }
    Ok(client)
}

pub(super) fn prepare_rule(mut rule: DenyRule) -> DenyRule {
    rule.normalize();
    if rule.id.trim().is_empty() {
        rule.id = new_id();
    }
    rule
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn find_by_client_id(&self, client_id: &str) -> StoreResult<Option<RegisteredClient>> {
        let clients = self.clients.read().await;
        Ok(clients.values().find(|c| c.client_id == client_id).cloned())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<RegisteredClient>> {
        Ok(self.clients.read().await.get(id).cloned())
    }

    async fn save(&self, client: RegisteredClient) -> StoreResult<RegisteredClient> {
        let client = prepare_client(client)?;
        let mut clients = self.clients.write().await;
        let duplicate = clients
            .values()
            .any(|existing| existing.client_id == client.client_id && existing.id != client.id);
        if duplicate {
            return Err(StoreError::invalid(format!(
                "client_id '{}' is already registered",
                client.client_id
            )));
        }
        clients.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.clients.write().await.remove(id).is_some())
    }

    async fn list_all(&self) -> StoreResult<Vec<RegisteredClient>> {
        Ok(self.clients.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl DenyRuleStore for MemoryStore {
    async fn list_active_for(
        &self,
        provider: &str,
        field: MatchField,
    ) -> StoreResult<Vec<DenyRule>> {
        let rules = self.deny_rules.read().await;
        let mut active: Vec<_> = rules
            .values()
            .filter(|r| r.enabled && r.match_field == field && r.applies_to_provider(provider))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn save(&self, rule: DenyRule) -> StoreResult<DenyRule> {
        let rule = prepare_rule(rule);
        self.deny_rules.write().await.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.deny_rules.write().await.remove(id).is_some())
    }

    async fn list_all(&self) -> StoreResult<Vec<DenyRule>> {
        Ok(self.deny_rules.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserAccount>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username.eq_ignore_ascii_case(username)).cloned())
    }

    async fn find_by_subject(&self, subject: &str) -> StoreResult<Option<UserAccount>> {
        Ok(self.users.read().await.get(subject).cloned())
    }

    async fn save(&self, account: UserAccount) -> StoreResult<UserAccount> {
        if account.subject.trim().is_empty() || account.username.trim().is_empty() {
            return Err(StoreError::invalid("users need a subject and a username"));
        }
        self.users.write().await.insert(account.subject.clone(), account.clone());
        Ok(account)
    }
}
