//! HTTP transport: shared state and the router.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::browser::BrowserSessions;
use super::handlers::{authorize, metadata, token};
use crate::audit::AuditSink;
use crate::config::Config;
use crate::keys::SigningKeyProvider;
use crate::oauth::{AuthorizationSessionCoordinator, ClientAuthenticator, OAuthStore};
use crate::store::Stores;
use crate::token::TokenService;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub oauth: Arc<OAuthStore>,
    pub keys: Arc<SigningKeyProvider>,
    pub coordinator: AuthorizationSessionCoordinator,
    pub tokens: TokenService,
    pub clients: ClientAuthenticator,
    pub sessions: BrowserSessions,
    pub audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("issuer", &self.config.issuer).finish()
    }
}

/// Create the HTTP router for the authorization server.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(metadata::health_check))
        .route("/ready", get(metadata::readiness_check))
        // Discovery
        .route("/.well-known/openid-configuration", get(metadata::discovery))
        .route("/.well-known/oauth-authorization-server", get(metadata::discovery))
        .route("/oauth2/jwks", get(metadata::jwks))
        // Browser flow
        .route("/oauth2/authorize", get(authorize::authorize))
        .route("/login", get(authorize::login_page).post(authorize::login_submit))
        .route("/oauth2/consent", get(authorize::consent_page).post(authorize::consent_submit))
        .route("/connect/logout", get(authorize::logout))
        // Back channel
        .route("/oauth2/token", post(token::token))
        .route("/oauth2/introspect", post(token::introspect))
        .route("/oauth2/revoke", post(token::revoke))
        .route("/userinfo", get(token::userinfo).post(token::userinfo))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
