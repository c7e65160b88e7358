//! Authorization request validation.
//!
//! `redirect_uri` is resolved first: until it is known to belong to the
//! client, every error is rendered as a response body so the error channel
//! cannot be used as an open redirect. Once resolved, later errors travel
//! back to the client on the redirect.

use std::net::IpAddr;

use url::{Host, Url};

use super::pkce::{self, CodeChallengeMethod};
use super::types::{AuthorizationRequest, ValidatedRequest};
use crate::error::{ErrorCode, OAuthError};
use crate::models::{GrantType, OPENID, RegisteredClient, parse_scope};

/// How a validation failure must be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// `redirect_uri` is unvalidated; answer with an error body.
    Body(OAuthError),
    /// Send the error to the validated redirect URI.
    Redirect {
        error: OAuthError,
        redirect_uri: String,
        state: Option<String>,
    },
}

impl Rejection {
    #[must_use]
    pub const fn error(&self) -> &OAuthError {
        match self {
            Self::Body(error) | Self::Redirect { error, .. } => error,
        }
    }
}

/// Validates `/oauth2/authorize` requests against a resolved client. Pure:
/// no I/O, no side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationRequestValidator {
    allow_plain_pkce: bool,
}

impl AuthorizationRequestValidator {
    #[must_use]
    pub const fn new(allow_plain_pkce: bool) -> Self {
        Self { allow_plain_pkce }
    }

    pub fn validate(
        &self,
        request: &AuthorizationRequest,
        client: &RegisteredClient,
    ) -> Result<ValidatedRequest, Rejection> {
        let scopes = parse_scope(request.scope.as_deref().unwrap_or_default());
        let (redirect_uri, redirect_uri_supplied) =
            resolve_redirect_uri(request.redirect_uri.as_deref(), client, scopes.contains(OPENID))
                .map_err(Rejection::Body)?;

        let redirect = |error: OAuthError| Rejection::Redirect {
            error,
            redirect_uri: redirect_uri.clone(),
            state: request.state.clone(),
        };

        match request.response_type.as_deref() {
            Some("code") => {}
            None | Some("") => {
                return Err(redirect(OAuthError::invalid_request("Missing response_type")));
            }
            Some(_) => {
                return Err(redirect(OAuthError::new(
                    ErrorCode::UnsupportedResponseType,
                    "Only response_type=code is supported",
                )));
            }
        }

        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(redirect(OAuthError::unauthorized_client(
                "Client is not allowed to use the authorization code grant",
            )));
        }

        let (code_challenge, code_challenge_method) = self.validate_pkce(request, client).map_err(redirect)?;

        if let Some(scope) = scopes.iter().find(|s| !client.scopes.contains(*s)) {
            return Err(redirect(OAuthError::invalid_scope(format!(
                "Scope '{scope}' is not allowed for this client"
            ))));
        }

        Ok(ValidatedRequest {
            client_id: client.client_id.clone(),
            redirect_uri,
            redirect_uri_supplied,
            scopes,
            state: request.state.clone(),
            nonce: request.nonce.clone(),
            code_challenge,
            code_challenge_method,
        })
    }

    fn validate_pkce(
        &self,
        request: &AuthorizationRequest,
        client: &RegisteredClient,
    ) -> Result<(Option<String>, Option<CodeChallengeMethod>), OAuthError> {
        let challenge = request.code_challenge.as_deref().filter(|c| !c.is_empty());
        let Some(challenge) = challenge else {
            if client.require_proof_key {
                return Err(OAuthError::invalid_request("code_challenge is required"));
            }
            if request.code_challenge_method.is_some() {
                return Err(OAuthError::invalid_request(
                    "code_challenge_method without code_challenge",
                ));
            }
            return Ok((None, None));
        };

        let method = match request.code_challenge_method.as_deref() {
            Some("S256") => CodeChallengeMethod::S256,
            Some("plain") | None if self.allow_plain_pkce => CodeChallengeMethod::Plain,
            Some(_) | None => {
                return Err(OAuthError::invalid_request("code_challenge_method must be S256"));
            }
        };

        if !pkce::is_well_formed(challenge) {
            return Err(OAuthError::invalid_request("code_challenge is malformed"));
        }

        Ok((Some(challenge.to_string()), Some(method)))
    }
}

/// Resolve the effective redirect URI. Returns the URI and whether the
/// request supplied it.
fn resolve_redirect_uri(
    requested: Option<&str>,
    client: &RegisteredClient,
    openid_requested: bool,
) -> Result<(String, bool), OAuthError> {
    let Some(requested) = requested.filter(|r| !r.is_empty()) else {
        return match client.redirect_uris.as_slice() {
            [only] if !openid_requested => Ok((only.clone(), false)),
            _ => Err(OAuthError::invalid_request("OAuth 2.0 Parameter: redirect_uri")),
        };
    };

    let parsed = Url::parse(requested)
        .map_err(|_| OAuthError::invalid_request("OAuth 2.0 Parameter: redirect_uri"))?;
    if parsed.fragment().is_some() {
        return Err(OAuthError::invalid_request("OAuth 2.0 Parameter: redirect_uri"));
    }

    let matched = client
        .redirect_uris
        .iter()
        .filter_map(|registered| Url::parse(registered).ok())
        .any(|registered| redirect_matches(&registered, &parsed));

    if matched {
        Ok((requested.to_string(), true))
    } else {
        tracing::debug!(client_id = %client.client_id, "Unregistered redirect_uri rejected");
        Err(OAuthError::invalid_request("OAuth 2.0 Parameter: redirect_uri"))
    }
}

/// True for IPv4 `127.0.0.0/8` and IPv6 `::1` literals. Host names such as
/// `localhost` do not qualify.
#[must_use]
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(addr)) => IpAddr::V4(addr).is_loopback(),
        Some(Host::Ipv6(addr)) => IpAddr::V6(addr).is_loopback(),
        _ => false,
    }
}

/// Compare a requested redirect URI against a registered one. Query and
/// fragment are ignored and trailing slashes normalized. For loopback hosts
/// the request's port replaces the registered port before comparing.
#[must_use]
pub fn redirect_matches(registered: &Url, requested: &Url) -> bool {
    let port_matches = if is_loopback_host(requested) {
        true
    } else {
        registered.port_or_known_default() == requested.port_or_known_default()
    };

    port_matches
        && registered.scheme() == requested.scheme()
        && registered.host() == requested.host()
        && registered.username() == requested.username()
        && registered.password() == requested.password()
        && normalize_path(registered.path()) == normalize_path(requested.path())
}

fn normalize_path(path: &str) -> &str {
    path.trim_end_matches('/')
}
