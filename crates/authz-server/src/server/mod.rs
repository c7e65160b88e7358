//! HTTP server assembly.
//!
//! [`AuthorizationServer`] wires configuration, collaborator stores, the
//! signing key provider and the audit sink into the protocol services and
//! exposes them as an axum router.

pub mod browser;
pub mod handlers;
pub mod login;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::{Config, defaults};
use crate::error::ConfigError;
use crate::keys::SigningKeyProvider;
use crate::oauth::{AuthorizationSessionCoordinator, ClientAuthenticator, OAuthStore};
use crate::store::Stores;
use crate::token::{ClaimsCustomizer, SelfServiceScopesCustomizer, TokenService};

use browser::BrowserSessions;
use transport::AppState;

/// OAuth 2.0 / OIDC authorization server.
pub struct AuthorizationServer {
    state: Arc<AppState>,
}

impl AuthorizationServer {
    /// Assemble a server from its parts.
    #[must_use]
    pub fn new(
        config: Config,
        stores: Stores,
        keys: Arc<SigningKeyProvider>,
        audit: Arc<dyn AuditSink>,
        customizer: Arc<dyn ClaimsCustomizer>,
    ) -> Self {
        let oauth = Arc::new(OAuthStore::new());
        let coordinator = AuthorizationSessionCoordinator::new(&config, &stores, oauth.clone(), audit.clone());
        let tokens = TokenService::new(
            coordinator.clone(),
            oauth.clone(),
            keys.clone(),
            customizer,
            audit.clone(),
            config.issuer.clone(),
        );
        let clients = ClientAuthenticator::new(stores.clients.clone(), audit.clone(), config.store_timeout);
        let sessions = BrowserSessions::new(config.session_idle_ttl, config.issuer.starts_with("https://"));

        Self {
            state: Arc::new(AppState {
                config: Arc::new(config),
                stores,
                oauth,
                keys,
                coordinator,
                tokens,
                clients,
                sessions,
                audit,
            }),
        }
    }

    /// Build everything from configuration: stores per the selected backend,
    /// the key provider (failing fast without a key source), tracing audit
    /// and the self-service scope customizer.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for any start-up misconfiguration.
    pub async fn from_config(config: Config) -> Result<Self, ConfigError> {
        let keys = Arc::new(SigningKeyProvider::from_config(&config)?);
        let stores = Stores::from_config(&config).await?;
        let customizer = Arc::new(SelfServiceScopesCustomizer::from_config(&config));
        Ok(Self::new(config, stores, keys, Arc::new(TracingAuditSink), customizer))
    }

    /// The HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        transport::create_router(self.state.clone())
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serve HTTP until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error on bind or server failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        let port = self.state.config.port;
        tracing::info!(issuer = %self.state.config.issuer, "Starting authorization server on port {}", port);

        self.state.oauth.clone().start_cleanup_task(defaults::CLEANUP_INTERVAL);

        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("issuer", &self.state.config.issuer)
            .finish()
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
