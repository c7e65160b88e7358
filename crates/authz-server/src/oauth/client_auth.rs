//! Token-endpoint client authentication: `client_secret_basic`,
//! `client_secret_post` and `none`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::error::{OAuthError, OAuthResult};
use crate::models::{ClientAuthMethod, RegisteredClient};
use crate::store::{ClientStore, with_timeout};

/// Credentials as presented on the wire.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    Basic { client_id: String, secret: String },
    Post { client_id: String, secret: String },
    None { client_id: String },
}

impl ClientCredentials {
    /// Extract credentials from the `Authorization` header and form fields.
    /// Presenting more than one method is an error.
    pub fn extract(
        headers: &HeaderMap,
        form_client_id: Option<&str>,
        form_secret: Option<&str>,
    ) -> OAuthResult<Self> {
        let basic = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic ").or_else(|| v.strip_prefix("basic ")));

        if let Some(encoded) = basic {
            if form_secret.is_some() {
                return Err(OAuthError::invalid_request("Multiple client authentication methods"));
            }
            let decoded = STANDARD
                .decode(encoded.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(OAuthError::invalid_client)?;
            let (client_id, secret) = decoded.split_once(':').ok_or_else(OAuthError::invalid_client)?;
            let (client_id, secret) = (form_decode(client_id), form_decode(secret));
            if form_client_id.is_some_and(|id| id != client_id) {
                return Err(OAuthError::invalid_request("client_id does not match credentials"));
            }
            return Ok(Self::Basic { client_id, secret });
        }

        match (form_client_id.filter(|id| !id.is_empty()), form_secret) {
            (Some(client_id), Some(secret)) => {
                Ok(Self::Post { client_id: client_id.to_string(), secret: secret.to_string() })
            }
            (Some(client_id), None) => Ok(Self::None { client_id: client_id.to_string() }),
            (None, _) => Err(OAuthError::invalid_client()),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        match self {
            Self::Basic { client_id, .. } | Self::Post { client_id, .. } | Self::None { client_id } => {
                client_id
            }
        }
    }

    #[must_use]
    pub const fn method(&self) -> ClientAuthMethod {
        match self {
            Self::Basic { .. } => ClientAuthMethod::ClientSecretBasic,
            Self::Post { .. } => ClientAuthMethod::ClientSecretPost,
            Self::None { .. } => ClientAuthMethod::None,
        }
    }
}

/// Undo the `application/x-www-form-urlencoded` encoding RFC 6749 §2.3.1
/// applies to both halves of a Basic credential. Literal `&` and `=` are
/// data here, not pair separators.
fn form_decode(raw: &str) -> String {
    let escaped = raw.replace('&', "%26").replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(value, _)| value.into_owned())
        .unwrap_or_default()
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id())
            .field("method", &self.method())
            .finish()
    }
}

/// Resolves and authenticates clients for the token, introspection and
/// revocation endpoints.
#[derive(Clone)]
pub struct ClientAuthenticator {
    clients: Arc<dyn ClientStore>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl ClientAuthenticator {
    #[must_use]
    pub fn new(clients: Arc<dyn ClientStore>, audit: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self { clients, audit, timeout }
    }

    /// Look up an enabled client. Disabled clients are reported as unknown.
    pub async fn find_client(&self, client_id: &str) -> OAuthResult<Option<RegisteredClient>> {
        let client = with_timeout(self.timeout, self.clients.find_by_client_id(client_id)).await?;
        Ok(client.filter(|c| c.enabled))
    }

    /// Authenticate presented credentials. Every failure is `invalid_client`.
    pub async fn authenticate(&self, credentials: &ClientCredentials) -> OAuthResult<RegisteredClient> {
        let client_id = credentials.client_id();
        let Some(client) = self.find_client(client_id).await? else {
            if let ClientCredentials::Basic { secret, .. } | ClientCredentials::Post { secret, .. } = credentials {
                crate::credentials::burn_verification(secret).await;
            }
            return Err(self.fail(client_id, "unknown client").await);
        };

        let method = credentials.method();
        if !client.allows_auth_method(method) {
            return Err(self.fail(client_id, "auth method not allowed").await);
        }

        let verified = match credentials {
            ClientCredentials::Basic { secret, .. } | ClientCredentials::Post { secret, .. } => {
                client.verify_secret(secret).await
            }
            ClientCredentials::None { .. } => client.is_public(),
        };
        if !verified {
            return Err(self.fail(client_id, "bad credentials").await);
        }

        Ok(client)
    }

    async fn fail(&self, client_id: &str, reason: &str) -> OAuthError {
        tracing::debug!(client_id = %client_id, reason, "Client authentication failed");
        self.audit
            .publish(
                AuditEvent::new(AuditEventType::ClientAuthenticationFailure)
                    .client(client_id)
                    .detail("reason", reason),
            )
            .await;
        OAuthError::invalid_client()
    }
}

impl std::fmt::Debug for ClientAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuthenticator").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(id: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn test_extract_basic() {
        let creds = ClientCredentials::extract(&basic("svc", "pw:with:colons"), None, None).unwrap();
        assert_eq!(
            creds,
            ClientCredentials::Basic { client_id: "svc".into(), secret: "pw:with:colons".into() }
        );
    }

    #[test]
    fn test_extract_basic_form_decodes_both_halves() {
        let creds = ClientCredentials::extract(&basic("my%20app", "a%2Bb%3Ac+d%C3%A9"), None, None).unwrap();
        assert_eq!(
            creds,
            ClientCredentials::Basic { client_id: "my app".into(), secret: "a+b:c dé".into() }
        );
    }

    #[test]
    fn test_extract_basic_keeps_literal_separators() {
        let creds = ClientCredentials::extract(&basic("svc", "k=v&x"), None, None).unwrap();
        assert_eq!(creds, ClientCredentials::Basic { client_id: "svc".into(), secret: "k=v&x".into() });
    }

    #[test]
    fn test_extract_basic_decoded_id_must_match_form() {
        let creds = ClientCredentials::extract(&basic("my%20app", "pw"), Some("my app"), None).unwrap();
        assert_eq!(creds.client_id(), "my app");
    }

    #[test]
    fn test_extract_post_and_none() {
        let headers = HeaderMap::new();
        let post = ClientCredentials::extract(&headers, Some("svc"), Some("pw")).unwrap();
        assert_eq!(post.method(), ClientAuthMethod::ClientSecretPost);
        let none = ClientCredentials::extract(&headers, Some("spa"), None).unwrap();
        assert_eq!(none.method(), ClientAuthMethod::None);
    }

    #[test]
    fn test_extract_rejects_two_methods() {
        let err = ClientCredentials::extract(&basic("svc", "pw"), None, Some("pw")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_extract_requires_client_id() {
        let err = ClientCredentials::extract(&HeaderMap::new(), None, None).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidClient);
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds = ClientCredentials::Post { client_id: "svc".into(), secret: "hunter2".into() };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
