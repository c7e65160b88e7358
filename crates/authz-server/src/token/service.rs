//! Token endpoint grants: `authorization_code`, `refresh_token` and
//! `client_credentials`.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::claims::{AccessTokenClaims, Claims, ClaimsContext, ClaimsCustomizer, TokenKind};
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::error::{OAuthError, OAuthResult};
use crate::keys::{KeySet, SigningKeyProvider};
use crate::models::{GrantType, OPENID, Principal, RegisteredClient, ScopeSet, format_scope, parse_scope};
use crate::oauth::AuthorizationSessionCoordinator;
use crate::oauth::store::OAuthStore;
use crate::oauth::types::{IssuedAccessToken, RefreshRecord};

/// `POST /oauth2/token` form fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Successful token response (RFC 6749 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// A signed access token and the scope it carries.
struct MintedAccess {
    token: String,
    issued: IssuedAccessToken,
    scope: Option<String>,
}

/// Mints signed tokens. Access and ID tokens are not persisted; their jti
/// and expiry are tracked against the grant that produced them so they can
/// be revoked with it.
#[derive(Clone)]
pub struct TokenService {
    pub(super) coordinator: AuthorizationSessionCoordinator,
    pub(super) store: Arc<OAuthStore>,
    pub(super) keys: Arc<SigningKeyProvider>,
    pub(super) customizer: Arc<dyn ClaimsCustomizer>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub(super) issuer: String,
}

impl TokenService {
    #[must_use]
    pub fn new(
        coordinator: AuthorizationSessionCoordinator,
        store: Arc<OAuthStore>,
        keys: Arc<SigningKeyProvider>,
        customizer: Arc<dyn ClaimsCustomizer>,
        audit: Arc<dyn AuditSink>,
        issuer: impl Into<String>,
    ) -> Self {
        Self { coordinator, store, keys, customizer, audit, issuer: issuer.into() }
    }

    /// Run a grant for an already authenticated client.
    pub async fn exchange(&self, client: &RegisteredClient, request: &TokenRequest) -> OAuthResult<TokenResponse> {
        let grant_type = request
            .grant_type
            .as_deref()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| OAuthError::invalid_request("Missing grant_type"))?;
        let grant = GrantType::from_param(grant_type).ok_or_else(OAuthError::unsupported_grant_type)?;

        if !client.allows_grant(grant) {
            return Err(OAuthError::unauthorized_client("The client is not allowed to use this grant type"));
        }
        if client.is_public() && grant == GrantType::ClientCredentials {
            return Err(OAuthError::unauthorized_client("Public clients cannot use client_credentials"));
        }

        // Resolve keys before consuming anything single-use.
        let keys = self.keys.get_active_keyset().await?;

        match grant {
            GrantType::AuthorizationCode => self.authorization_code(&keys, client, request).await,
            GrantType::RefreshToken => self.refresh_token(&keys, client, request).await,
            GrantType::ClientCredentials => self.client_credentials(&keys, client, request).await,
        }
    }

    async fn authorization_code(
        &self,
        keys: &KeySet,
        client: &RegisteredClient,
        request: &TokenRequest,
    ) -> OAuthResult<TokenResponse> {
        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OAuthError::invalid_request("Missing code"))?;

        let redeemed = self
            .coordinator
            .redeem(code, client, request.redirect_uri.as_deref(), request.code_verifier.as_deref())
            .await?;
        let grant = redeemed.code;
        let grant_kind = GrantType::AuthorizationCode;

        let access = self.mint_access(keys, client, &grant.principal, &grant.scopes, grant_kind)?;

        let refresh = if client.allows_grant(GrantType::RefreshToken) {
            let record = RefreshRecord {
                client_id: client.client_id.clone(),
                principal: grant.principal.clone(),
                scopes: grant.scopes.clone(),
                nonce: grant.request.nonce.clone(),
                expires_at: expires_at(client.token_settings.refresh_token_ttl_secs),
                access_tokens: vec![access.issued.clone()],
                replaced_by: None,
                revoked: false,
            };
            Some(self.store.create_refresh_token(record).await)
        } else {
            None
        };

        self.store
            .attach_tokens_to_code(
                &redeemed.digest,
                refresh.as_ref().map(|(_, digest)| digest.clone()),
                access.issued.clone(),
            )
            .await;

        let id_token = if grant.scopes.contains(OPENID) {
            Some(self.mint_id_token(keys, client, &grant.principal, grant.request.nonce.as_deref(), grant_kind)?)
        } else {
            None
        };

        tracing::info!(client_id = %client.client_id, grant = grant_kind.as_str(), "Issued tokens");
        self.audit
            .publish(
                AuditEvent::new(AuditEventType::TokenIssued)
                    .principal(grant.principal.subject.clone())
                    .client(client.client_id.clone())
                    .detail("grant_type", grant_kind.as_str())
                    .detail("jti", access.issued.jti.clone()),
            )
            .await;

        Ok(self.response(client, access, refresh.map(|(token, _)| token), id_token))
    }

    async fn refresh_token(
        &self,
        keys: &KeySet,
        client: &RegisteredClient,
        request: &TokenRequest,
    ) -> OAuthResult<TokenResponse> {
        let presented = request
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::invalid_request("Missing refresh_token"))?;

        let (digest, record) = self.store.find_refresh(presented).await.ok_or_else(OAuthError::invalid_grant)?;
        if record.client_id != client.client_id || record.revoked {
            return Err(OAuthError::invalid_grant());
        }
        if record.replaced_by.is_some() {
            let revoked = self.store.revoke_refresh_chain(&digest).await;
            tracing::warn!(client_id = %client.client_id, revoked, "Rotated refresh token replayed; chain revoked");
            self.audit
                .publish(
                    AuditEvent::new(AuditEventType::TokenRevoked)
                        .principal(record.principal.subject.clone())
                        .client(client.client_id.clone())
                        .detail("reason", "refresh_token_replay"),
                )
                .await;
            return Err(OAuthError::invalid_grant());
        }
        if record.is_expired() {
            return Err(OAuthError::invalid_grant());
        }

        let scopes = match request.scope.as_deref().map(parse_scope).filter(|s| !s.is_empty()) {
            Some(requested) if !requested.is_subset(&record.scopes) => {
                return Err(OAuthError::invalid_scope("Requested scope exceeds the original grant"));
            }
            Some(requested) => requested,
            None => record.scopes.clone(),
        };

        let grant_kind = GrantType::RefreshToken;
        let (refresh_value, refresh_digest) = if client.token_settings.reuse_refresh_tokens {
            (presented.to_string(), digest)
        } else {
            let replacement = RefreshRecord {
                expires_at: expires_at(client.token_settings.refresh_token_ttl_secs),
                access_tokens: Vec::new(),
                replaced_by: None,
                revoked: false,
                ..record.clone()
            };
            // Losing a concurrent rotation means the token is no longer active.
            self.store.rotate_refresh(&digest, replacement).await.ok_or_else(OAuthError::invalid_grant)?
        };

        let access = self.mint_access(keys, client, &record.principal, &scopes, grant_kind)?;
        self.store.record_refresh_access(&refresh_digest, access.issued.clone()).await;

        let id_token = if scopes.contains(OPENID) {
            Some(self.mint_id_token(keys, client, &record.principal, record.nonce.as_deref(), grant_kind)?)
        } else {
            None
        };

        tracing::info!(client_id = %client.client_id, grant = grant_kind.as_str(), "Refreshed tokens");
        self.audit
            .publish(
                AuditEvent::new(AuditEventType::TokenRefreshed)
                    .principal(record.principal.subject.clone())
                    .client(client.client_id.clone())
                    .detail("jti", access.issued.jti.clone()),
            )
            .await;

        Ok(self.response(client, access, Some(refresh_value), id_token))
    }

    async fn client_credentials(
        &self,
        keys: &KeySet,
        client: &RegisteredClient,
        request: &TokenRequest,
    ) -> OAuthResult<TokenResponse> {
        let requested = request.scope.as_deref().map(parse_scope).unwrap_or_default();
        let scopes = if requested.is_empty() {
            client.scopes.clone()
        } else if requested.is_subset(&client.scopes) {
            requested
        } else {
            return Err(OAuthError::invalid_scope("Requested scope is not allowed for this client"));
        };

        let principal = Principal::for_client(&client.client_id);
        let grant_kind = GrantType::ClientCredentials;
        let access = self.mint_access(keys, client, &principal, &scopes, grant_kind)?;

        tracing::info!(client_id = %client.client_id, grant = grant_kind.as_str(), "Issued tokens");
        self.audit
            .publish(
                AuditEvent::new(AuditEventType::TokenIssued)
                    .principal(principal.subject.clone())
                    .client(client.client_id.clone())
                    .detail("grant_type", grant_kind.as_str())
                    .detail("jti", access.issued.jti.clone()),
            )
            .await;

        Ok(self.response(client, access, None, None))
    }

    fn response(
        &self,
        client: &RegisteredClient,
        access: MintedAccess,
        refresh_token: Option<String>,
        id_token: Option<String>,
    ) -> TokenResponse {
        TokenResponse {
            access_token: access.token,
            token_type: "Bearer".to_string(),
            expires_in: client.token_settings.access_token_ttl_secs,
            refresh_token,
            id_token,
            scope: access.scope,
        }
    }

    fn mint_access(
        &self,
        keys: &KeySet,
        client: &RegisteredClient,
        principal: &Principal,
        scopes: &ScopeSet,
        grant: GrantType,
    ) -> OAuthResult<MintedAccess> {
        let now = Utc::now().timestamp();
        let exp = now + client.token_settings.access_token_ttl_secs as i64;
        let jti = uuid::Uuid::new_v4().to_string();

        let mut claims = Claims::new();
        claims.insert("iss".into(), Value::from(self.issuer.clone()));
        claims.insert("sub".into(), Value::from(principal.subject.clone()));
        claims.insert("aud".into(), Value::from(client.client_id.clone()));
        claims.insert("client_id".into(), Value::from(client.client_id.clone()));
        claims.insert("iat".into(), Value::from(now));
        claims.insert("nbf".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(exp));
        claims.insert("jti".into(), Value::from(jti.clone()));
        if !scopes.is_empty() {
            claims.insert("scope".into(), Value::from(format_scope(scopes)));
        }

        let ctx = ClaimsContext { principal, client, kind: TokenKind::AccessToken, grant };
        let claims = self.customizer.customize(&ctx, claims);
        let scope = claims.get("scope").and_then(Value::as_str).map(str::to_string);
        let token = keys.active().sign(&claims)?;

        Ok(MintedAccess { token, issued: IssuedAccessToken { jti, expires_at: exp }, scope })
    }

    fn mint_id_token(
        &self,
        keys: &KeySet,
        client: &RegisteredClient,
        principal: &Principal,
        nonce: Option<&str>,
        grant: GrantType,
    ) -> OAuthResult<String> {
        let now = Utc::now().timestamp();
        let mut claims = Claims::new();
        claims.insert("iss".into(), Value::from(self.issuer.clone()));
        claims.insert("sub".into(), Value::from(principal.subject.clone()));
        claims.insert("aud".into(), Value::from(client.client_id.clone()));
        claims.insert("azp".into(), Value::from(client.client_id.clone()));
        claims.insert("iat".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(now + client.token_settings.access_token_ttl_secs as i64));
        claims.insert("auth_time".into(), Value::from(principal.auth_time.timestamp()));
        if let Some(nonce) = nonce {
            claims.insert("nonce".into(), Value::from(nonce));
        }

        let ctx = ClaimsContext { principal, client, kind: TokenKind::IdToken, grant };
        let claims = self.customizer.customize(&ctx, claims);
        Ok(keys.active().sign(&claims)?)
    }

    /// Validate a bearer access token: signature, issuer, expiry and the
    /// revocation registry.
    pub async fn verify_access_token(&self, token: &str) -> OAuthResult<AccessTokenClaims> {
        let keys = self.keys.get_active_keyset().await?;
        let data = keys.verify::<AccessTokenClaims>(token, &self.issuer).map_err(|err| {
            tracing::debug!(error = %err, "Access token rejected");
            OAuthError::invalid_token()
        })?;
        if self.store.is_jti_revoked(&data.claims.jti).await {
            return Err(OAuthError::invalid_token());
        }
        Ok(data.claims)
    }

    /// Issuer baked into every token.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").field("issuer", &self.issuer).finish()
    }
}

fn expires_at(ttl_secs: u64) -> i64 {
    Utc::now().timestamp() + ttl_secs as i64
}
