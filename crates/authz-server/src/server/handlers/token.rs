//! Back-channel endpoints: token, introspection, revocation and userinfo.

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use super::no_store;
use crate::error::{ErrorCode, OAuthError, OAuthResult};
use crate::models::{OPENID, RegisteredClient};
use crate::oauth::ClientCredentials;
use crate::server::transport::AppState;
use crate::store::with_timeout;
use crate::token::{TokenHintRequest, TokenRequest};

/// `POST /oauth2/token`
pub async fn token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TokenRequest>,
) -> Response {
    let result = async {
        let credentials =
            ClientCredentials::extract(&headers, form.client_id.as_deref(), form.client_secret.as_deref())?;
        let client = state.clients.authenticate(&credentials).await?;
        state.tokens.exchange(&client, &form).await
    }
    .await;

    match result {
        Ok(response) => no_store(Json(response).into_response()),
        Err(error) => error.into_response(),
    }
}

/// Authenticate the caller of introspection or revocation.
async fn authenticate_caller(
    state: &AppState,
    headers: &HeaderMap,
    form: &TokenHintRequest,
    allow_public: bool,
) -> OAuthResult<RegisteredClient> {
    let credentials =
        ClientCredentials::extract(headers, form.client_id.as_deref(), form.client_secret.as_deref())?;
    if !allow_public && matches!(credentials, ClientCredentials::None { .. }) {
        return Err(OAuthError::invalid_client());
    }
    state.clients.authenticate(&credentials).await
}

fn required_token(form: &TokenHintRequest) -> OAuthResult<&str> {
    form.token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::invalid_request("Missing token"))
}

/// `POST /oauth2/introspect`
pub async fn introspect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TokenHintRequest>,
) -> Response {
    let result = async {
        let caller = authenticate_caller(&state, &headers, &form, false).await?;
        let token = required_token(&form)?;
        state.tokens.introspect(token, form.token_type_hint.as_deref(), &caller).await
    }
    .await;

    match result {
        Ok(response) => no_store(Json(response).into_response()),
        Err(error) => error.into_response(),
    }
}

/// `POST /oauth2/revoke`
///
/// Answers 200 whether or not the token existed.
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TokenHintRequest>,
) -> Response {
    let result = async {
        let caller = authenticate_caller(&state, &headers, &form, true).await?;
        let token = required_token(&form)?;
        state.tokens.revoke(token, form.token_type_hint.as_deref(), &caller).await
    }
    .await;

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => error.into_response(),
    }
}

/// `GET|POST /userinfo`
pub async fn userinfo(
    State(state): State<Arc<AppState>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Response {
    let result = async {
        let TypedHeader(Authorization(bearer)) = bearer.ok_or_else(OAuthError::invalid_token)?;
        let claims = state.tokens.verify_access_token(bearer.token()).await?;
        if !claims.has_scope(OPENID) {
            return Err(OAuthError::new(
                ErrorCode::InsufficientScope,
                "The access token does not grant the openid scope",
            ));
        }

        let mut body = serde_json::json!({ "sub": claims.sub });
        let account = with_timeout(state.config.store_timeout, state.stores.users.find_by_subject(&claims.sub)).await?;
        if let Some(account) = account {
            body["preferred_username"] = account.username.into();
            if let Some(email) = account.email {
                body["email"] = email.into();
            }
            body["roles"] = account.roles.into();
        }
        Ok::<_, OAuthError>(body)
    }
    .await;

    match result {
        Ok(body) => no_store(Json(body).into_response()),
        Err(error) => error.into_response(),
    }
}
