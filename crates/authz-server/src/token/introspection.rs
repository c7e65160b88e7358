//! Token introspection (RFC 7662).

use serde::{Deserialize, Serialize};

use super::claims::AccessTokenClaims;
use super::service::TokenService;
use crate::audit::{AuditEvent, AuditEventType};
use crate::error::OAuthResult;
use crate::models::{RegisteredClient, format_scope};

/// `POST /oauth2/introspect` and `POST /oauth2/revoke` form fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenHintRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Introspection answer. Inactive tokens carry nothing but `active`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    fn from_access(claims: AccessTokenClaims) -> Self {
        Self {
            active: true,
            scope: claims.scope,
            client_id: claims.client_id,
            username: None,
            token_type: Some("Bearer".into()),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            sub: Some(claims.sub),
            iss: Some(claims.iss),
            jti: Some(claims.jti),
        }
    }
}

impl TokenService {
    /// Describe a token to an authenticated client. Unknown, malformed,
    /// expired and revoked tokens all come back as `active: false`.
    pub async fn introspect(
        &self,
        token: &str,
        hint: Option<&str>,
        caller: &RegisteredClient,
    ) -> OAuthResult<IntrospectionResponse> {
        let response = if hint == Some("access_token") {
            match self.introspect_access(token).await? {
                Some(found) => found,
                None => self.introspect_refresh(token).await,
            }
        } else {
            match self.introspect_refresh_opt(token).await {
                Some(found) => found,
                None => self.introspect_access(token).await?.unwrap_or_else(IntrospectionResponse::inactive),
            }
        };

        self.audit
            .publish(
                AuditEvent::new(AuditEventType::TokenIntrospection)
                    .client(caller.client_id.clone())
                    .detail("active", response.active.to_string()),
            )
            .await;
        Ok(response)
    }

    async fn introspect_refresh(&self, token: &str) -> IntrospectionResponse {
        self.introspect_refresh_opt(token).await.unwrap_or_else(IntrospectionResponse::inactive)
    }

    /// `None` when the value is not a known refresh token.
    async fn introspect_refresh_opt(&self, token: &str) -> Option<IntrospectionResponse> {
        let (_, record) = self.store.find_refresh(token).await?;
        if !record.is_active() {
            return Some(IntrospectionResponse::inactive());
        }
        Some(IntrospectionResponse {
            active: true,
            scope: Some(format_scope(&record.scopes)).filter(|s| !s.is_empty()),
            client_id: Some(record.client_id),
            username: record.principal.username,
            token_type: Some("refresh_token".into()),
            exp: Some(record.expires_at),
            iat: None,
            sub: Some(record.principal.subject),
            iss: Some(self.issuer.clone()),
            jti: None,
        })
    }

    /// `None` when the value does not verify as one of our access tokens.
    async fn introspect_access(&self, token: &str) -> OAuthResult<Option<IntrospectionResponse>> {
        let keys = self.keys.get_active_keyset().await?;
        let Ok(data) = keys.verify::<AccessTokenClaims>(token, &self.issuer) else {
            return Ok(None);
        };
        if self.store.is_jti_revoked(&data.claims.jti).await {
            return Ok(Some(IntrospectionResponse::inactive()));
        }
        Ok(Some(IntrospectionResponse::from_access(data.claims)))
    }
}
