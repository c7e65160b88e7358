//! File-backed collaborator store.
//!
//! Reads are served from memory; every write rewrites the whole JSON document
//! through a temporary file and a rename so readers never see a torn file.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ClientStore, DenyRuleStore, MemoryStore, StateDocument, UserDirectory};
use crate::error::StoreResult;
use crate::models::{DenyRule, MatchField, RegisteredClient, UserAccount};

pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Serializes document rewrites.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the document at `path`, creating an empty one if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the file exists but cannot be read or parsed,
    /// or if an empty document cannot be written.
    pub async fn open(path: PathBuf) -> StoreResult<Self> {
        let document = if tokio::fs::try_exists(&path).await? {
            StateDocument::load(&path).await?
        } else {
            StateDocument::default()
        };
        let store = Self {
            path,
            inner: MemoryStore::from_document(document)?,
            write_lock: Mutex::new(()),
        };
        store.persist().await?;
        Ok(store)
    }

    async fn persist(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let document = self.inner.snapshot().await;
        let json = serde_json::to_vec_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "Persisted state document");
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

#[async_trait]
impl ClientStore for FileStore {
    async fn find_by_client_id(&self, client_id: &str) -> StoreResult<Option<RegisteredClient>> {
        self.inner.find_by_client_id(client_id).await
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<RegisteredClient>> {
        self.inner.find_by_id(id).await
    }

    async fn save(&self, client: RegisteredClient) -> StoreResult<RegisteredClient> {
        let saved = ClientStore::save(&self.inner, client).await?;
        self.persist().await?;
        Ok(saved)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let removed = ClientStore::delete(&self.inner, id).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn list_all(&self) -> StoreResult<Vec<RegisteredClient>> {
        ClientStore::list_all(&self.inner).await
    }
}

#[async_trait]
impl DenyRuleStore for FileStore {
    async fn list_active_for(
        &self,
        provider: &str,
        field: MatchField,
    ) -> StoreResult<Vec<DenyRule>> {
        self.inner.list_active_for(provider, field).await
    }

    async fn save(&self, rule: DenyRule) -> StoreResult<DenyRule> {
        let saved = DenyRuleStore::save(&self.inner, rule).await?;
        self.persist().await?;
        Ok(saved)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let removed = DenyRuleStore::delete(&self.inner, id).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn list_all(&self) -> StoreResult<Vec<DenyRule>> {
        DenyRuleStore::list_all(&self.inner).await
    }
}

#[async_trait]
impl UserDirectory for FileStore {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserAccount>> {
        self.inner.find_by_username(username).await
    }

    async fn find_by_subject(&self, subject: &str) -> StoreResult<Option<UserAccount>> {
        self.inner.find_by_subject(subject).await
    }

    async fn save(&self, account: UserAccount) -> StoreResult<UserAccount> {
        let saved = UserDirectory::save(&self.inner, account).await?;
        self.persist().await?;
        Ok(saved)
    }
}
