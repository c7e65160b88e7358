//! Signing key provider.
//!
//! Supplies the active key set from a remote JWK source (cached with a TTL)
//! and/or a static set parsed once at start-up. Reads of a fresh cache are
//! lock-free through `ArcSwap`; refreshes are serialized by a mutex and
//! re-check the cache after acquiring it, so concurrent callers collapse into
//! one fetch. A failed fetch falls back to the last cached set, then to the
//! static set. The provider never hands out an empty set.

pub mod jwk;
mod remote;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::Mutex;

pub use jwk::{Jwk, Jwks, KeySet, PrivateJwk, PrivateJwkSet, SigningKey, generate_es256};
pub use remote::HttpKeySource;

use crate::config::Config;
use crate::error::{ConfigError, KeyError};

/// A network-bound source of key sets.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<KeySet, KeyError>;
}

/// A key set and when it was obtained.
#[derive(Debug)]
struct CachedKeySet {
    value: Arc<KeySet>,
    fetched_at: Instant,
}

pub struct SigningKeyProvider {
    remote: Option<Arc<dyn KeySource>>,
    static_set: Option<Arc<KeySet>>,
    cache: ArcSwapOption<CachedKeySet>,
    refresh: Mutex<()>,
    ttl: Duration,
    fetch_timeout: Duration,
}

impl SigningKeyProvider {
    /// Create a provider. At least one source is required.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoKeySource` when both sources are absent.
    pub fn new(
        remote: Option<Arc<dyn KeySource>>,
        static_set: Option<KeySet>,
        ttl: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if remote.is_none() && static_set.is_none() {
            return Err(ConfigError::NoKeySource);
        }
        Ok(Self {
            remote,
            static_set: static_set.map(Arc::new),
            cache: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
            ttl,
            fetch_timeout,
        })
    }

    /// Build the provider from configuration, parsing the static set now.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when no source is configured, the static set is
    /// malformed, or the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let static_set = match config.static_jwks.as_deref() {
            Some(raw) => {
                let json = if raw.trim_start().starts_with('{') {
                    raw.to_string()
                } else {
                    std::fs::read_to_string(raw).map_err(|e| {
                        ConfigError::invalid("AUTHZ_STATIC_JWKS", format!("cannot read '{raw}': {e}"))
                    })?
                };
                let set = KeySet::parse(&json).map_err(ConfigError::MalformedKeys)?;
                tracing::info!(
                    keys = set.len(),
                    kid = %set.active().kid(),
                    "Loaded static signing key set"
                );
                Some(set)
            }
            None => None,
        };

        let remote = match config.keyset_url.as_deref() {
            Some(url) => {
                let source =
                    HttpKeySource::new(url, config.keyset_token.clone(), config.key_fetch_timeout)
                        .map_err(|e| ConfigError::invalid("AUTHZ_KEYSET_URL", e.to_string()))?;
                Some(Arc::new(source) as Arc<dyn KeySource>)
            }
            None => None,
        };

        Self::new(remote, static_set, config.key_cache_ttl, config.key_fetch_timeout)
    }

    /// The current key set. Never empty.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Unavailable` only when the remote fetch fails and
    /// neither a previously cached set nor a static set exists.
    pub async fn get_active_keyset(&self) -> Result<Arc<KeySet>, KeyError> {
        if let Some(set) = self.fresh() {
            return Ok(set);
        }

        let _guard = self.refresh.lock().await;
        if let Some(set) = self.fresh() {
            return Ok(set);
        }

        let set = self.load().await?;
        self.cache.store(Some(Arc::new(CachedKeySet {
            value: Arc::clone(&set),
            fetched_at: Instant::now(),
        })));
        Ok(set)
    }

    fn fresh(&self) -> Option<Arc<KeySet>> {
        let cached = self.cache.load_full()?;
        (cached.fetched_at.elapsed() < self.ttl).then(|| Arc::clone(&cached.value))
    }

    async fn load(&self) -> Result<Arc<KeySet>, KeyError> {
        let Some(remote) = &self.remote else {
            return self.static_fallback();
        };

        let error = match tokio::time::timeout(self.fetch_timeout, remote.fetch()).await {
            Ok(Ok(set)) => {
                tracing::info!(keys = set.len(), kid = %set.active().kid(), "Fetched signing key set");
                return Ok(Arc::new(set));
            }
            Ok(Err(e)) => e,
            Err(_) => KeyError::Timeout(self.fetch_timeout),
        };

        if let Some(previous) = self.cache.load_full() {
            tracing::warn!(error = %error, "Key set fetch failed, keeping last known good set");
            return Ok(Arc::clone(&previous.value));
        }
        tracing::warn!(error = %error, "Key set fetch failed, falling back to static set");
        self.static_fallback().map_err(|_| KeyError::Unavailable(error.to_string()))
    }

    fn static_fallback(&self) -> Result<Arc<KeySet>, KeyError> {
        self.static_set
            .clone()
            .ok_or_else(|| KeyError::Unavailable("no static key set configured".into()))
    }
}

impl std::fmt::Debug for SigningKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyProvider")
            .field("remote", &self.remote.is_some())
            .field("static", &self.static_set.is_some())
            .field("ttl", &self.ttl)
            .finish()
    }
}
