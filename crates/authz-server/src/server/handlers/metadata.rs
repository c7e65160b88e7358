//! Discovery, JWKS and health endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::config::defaults;
use crate::error::OAuthError;
use crate::oauth::pkce::CodeChallengeMethod;
use crate::server::transport::AppState;

/// `GET /.well-known/openid-configuration` and
/// `GET /.well-known/oauth-authorization-server` (RFC 8414).
pub async fn discovery(State(state): State<Arc<AppState>>) -> Response {
    let keys = match state.keys.get_active_keyset().await {
        Ok(keys) => keys,
        Err(err) => return OAuthError::from(err).into_response(),
    };
    let config = &state.config;

    let mut challenge_methods = vec![CodeChallengeMethod::S256.as_str()];
    if config.allow_plain_pkce {
        challenge_methods.push(CodeChallengeMethod::Plain.as_str());
    }

    let mut scopes = vec!["openid".to_string()];
    scopes.extend(config.self_service_scopes.iter().cloned());
    scopes.push(config.admin_scope.clone());

    let auth_methods = ["client_secret_basic", "client_secret_post", "none"];

    Json(serde_json::json!({
        "issuer": config.issuer,
        "authorization_endpoint": config.endpoint("/oauth2/authorize"),
        "token_endpoint": config.endpoint("/oauth2/token"),
        "jwks_uri": config.endpoint("/oauth2/jwks"),
        "userinfo_endpoint": config.endpoint("/userinfo"),
        "revocation_endpoint": config.endpoint("/oauth2/revoke"),
        "introspection_endpoint": config.endpoint("/oauth2/introspect"),
        "end_session_endpoint": config.endpoint("/connect/logout"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token", "client_credentials"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": keys.algorithms(),
        "scopes_supported": scopes,
        "token_endpoint_auth_methods_supported": auth_methods,
        "revocation_endpoint_auth_methods_supported": auth_methods,
        "introspection_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": challenge_methods,
    }))
    .into_response()
}

/// `GET /oauth2/jwks`
///
/// Public halves of every key, active and retired.
pub async fn jwks(State(state): State<Arc<AppState>>) -> Response {
    match state.keys.get_active_keyset().await {
        Ok(keys) => {
            let mut response = Json(keys.public_jwks()).into_response();
            let cache_control = format!("public, max-age={}", defaults::JWKS_MAX_AGE.as_secs());
            if let Ok(value) = HeaderValue::from_str(&cache_control) {
                response.headers_mut().insert(header::CACHE_CONTROL, value);
            }
            response
        }
        Err(err) => OAuthError::from(err).into_response(),
    }
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "authz-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready when a key set can be produced.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match state.keys.get_active_keyset().await {
        Ok(keys) => Json(serde_json::json!({
            "status": "ready",
            "service": "authz-server",
            "version": env!("CARGO_PKG_VERSION"),
            "keys": keys.len(),
            "active_kid": keys.active().kid(),
        }))
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unavailable",
                    "service": "authz-server",
                    "version": env!("CARGO_PKG_VERSION"),
                })),
            )
                .into_response()
        }
    }
}
