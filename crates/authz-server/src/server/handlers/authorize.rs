//! Browser-facing endpoints: authorize, login, consent and logout.

use std::sync::Arc;

use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use url::Url;

use super::found;
use crate::audit::{AuditEvent, AuditEventType};
use crate::models::ScopeSet;
use crate::oauth::{AuthorizationRequest, AuthorizeOutcome};
use crate::server::login::{render_consent_page, render_login_page, render_message_page};
use crate::server::transport::AppState;

/// Where a denied login lands.
const DENIED_LOCATION: &str = "/login?denied=1";

/// Translate a coordinator outcome into a browser response.
async fn respond(state: &AppState, outcome: AuthorizeOutcome, jar: CookieJar) -> Response {
    match outcome {
        AuthorizeOutcome::RedirectToClient(location) => (jar, found(&location)).into_response(),
        AuthorizeOutcome::RedirectToLogin { flow_id } => {
            (jar, found(&format!("/login?flow={flow_id}"))).into_response()
        }
        AuthorizeOutcome::RedirectToConsent { flow_id } => {
            (jar, found(&format!("/oauth2/consent?flow={flow_id}"))).into_response()
        }
        AuthorizeOutcome::ErrorBody(error) => (jar, error).into_response(),
        AuthorizeOutcome::Denied => {
            let jar = state.sessions.invalidate(jar).await;
            (jar, found(DENIED_LOCATION)).into_response()
        }
    }
}

/// `GET /oauth2/authorize`
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Query(request): Query<AuthorizationRequest>,
    jar: CookieJar,
) -> Response {
    let session = state.sessions.current(&jar).await;
    let outcome = state.coordinator.begin(&request, session.as_ref()).await;
    respond(&state, outcome, jar).await
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub flow: Option<String>,
    pub denied: Option<String>,
}

/// `GET /login`
pub async fn login_page(Query(query): Query<LoginQuery>) -> Html<String> {
    let error = query.denied.is_some().then_some("Sign-in is not permitted for this account.");
    Html(render_login_page(query.flow.as_deref(), error))
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub flow: Option<String>,
}

/// `POST /login`
pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let flow = form.flow.as_deref().filter(|f| !f.is_empty());

    let principal = match state.coordinator.verify_credentials(&form.username, &form.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Html(render_login_page(flow, Some("Invalid username or password."))),
            )
                .into_response();
        }
        Err(error) => return error.into_response(),
    };

    let Some(flow_id) = flow else {
        // A plain sign-in without a pending authorization.
        return match state.coordinator.admit(&principal, None).await {
            Ok(true) => {
                let jar = state.sessions.establish(jar, principal).await;
                (jar, Html(render_message_page("Signed in", "You are now signed in."))).into_response()
            }
            Ok(false) => respond(&state, AuthorizeOutcome::Denied, jar).await,
            Err(error) => error.into_response(),
        };
    };

    match state.coordinator.authenticate(flow_id, principal.clone()).await {
        Ok(AuthorizeOutcome::Denied) => respond(&state, AuthorizeOutcome::Denied, jar).await,
        Ok(outcome) => {
            let jar = state.sessions.establish(jar, principal).await;
            respond(&state, outcome, jar).await
        }
        Err(error) => error.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsentQuery {
    pub flow: String,
}

/// `GET /oauth2/consent`
pub async fn consent_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConsentQuery>,
    jar: CookieJar,
) -> Response {
    let Some(principal) = state.sessions.current(&jar).await else {
        return found(&format!("/login?flow={}", query.flow));
    };
    match state.coordinator.consent_view(&query.flow, &principal.subject).await {
        Ok(view) => Html(render_consent_page(&view)).into_response(),
        Err(error) => error.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    pub flow: String,
    pub decision: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

/// `POST /oauth2/consent`
pub async fn consent_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    axum_extra::extract::Form(form): axum_extra::extract::Form<ConsentForm>,
) -> Response {
    let Some(principal) = state.sessions.current(&jar).await else {
        return found(&format!("/login?flow={}", form.flow));
    };
    let approve = form.decision == "approve";
    let approved: ScopeSet = form.scope.into_iter().collect();

    match state.coordinator.consent(&form.flow, &principal.subject, approve, &approved).await {
        Ok(outcome) => respond(&state, outcome, jar).await,
        Err(error) => error.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    pub client_id: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub state: Option<String>,
}

/// `GET /connect/logout`
///
/// Clears the browser session. Redirects only to a post-logout URI
/// registered for the named client, compared exactly.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogoutQuery>,
    jar: CookieJar,
) -> Response {
    let principal = state.sessions.current(&jar).await;
    let jar = state.sessions.invalidate(jar).await;

    let mut event = AuditEvent::new(AuditEventType::Logout);
    if let Some(principal) = &principal {
        event = event.principal(principal.subject.clone());
    }
    if let Some(client_id) = &query.client_id {
        event = event.client(client_id.clone());
    }
    state.audit.publish(event).await;

    if let (Some(client_id), Some(target)) = (&query.client_id, &query.post_logout_redirect_uri) {
        let registered = match state.clients.find_client(client_id).await {
            Ok(client) => client.is_some_and(|c| c.post_logout_redirect_uris.iter().any(|u| u == target)),
            Err(_) => false,
        };
        if registered {
            if let Ok(mut url) = Url::parse(target) {
                if let Some(value) = &query.state {
                    url.query_pairs_mut().append_pair("state", value);
                }
                return (jar, found(url.as_str())).into_response();
            }
        } else {
            tracing::debug!(client_id = %client_id, "Post-logout redirect not registered");
        }
    }

    (jar, Html(render_message_page("Signed out", "You have been signed out."))).into_response()
}
