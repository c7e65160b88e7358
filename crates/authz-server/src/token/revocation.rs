//! Token revocation (RFC 7009).

use super::claims::AccessTokenClaims;
use super::service::TokenService;
use crate::audit::{AuditEvent, AuditEventType};
use crate::error::OAuthResult;
use crate::models::RegisteredClient;

impl TokenService {
    /// Revoke a token owned by `caller`. Succeeds whether or not the token
    /// exists, so the endpoint cannot be used to probe for tokens.
    ///
    /// Refresh tokens take their rotation chain and every access token
    /// minted from it with them. Access tokens are denied by jti until their
    /// own expiry.
    pub async fn revoke(&self, token: &str, hint: Option<&str>, caller: &RegisteredClient) -> OAuthResult<()> {
        let revoked = if hint == Some("access_token") {
            self.revoke_access(token, caller).await? || self.revoke_refresh(token, caller).await
        } else {
            self.revoke_refresh(token, caller).await || self.revoke_access(token, caller).await?
        };

        if revoked {
            self.audit
                .publish(
                    AuditEvent::new(AuditEventType::TokenRevoked)
                        .client(caller.client_id.clone())
                        .detail("reason", "client_request"),
                )
                .await;
        } else {
            tracing::debug!(client_id = %caller.client_id, "Revocation matched no token");
        }
        Ok(())
    }

    async fn revoke_refresh(&self, token: &str, caller: &RegisteredClient) -> bool {
        let Some((digest, record)) = self.store.find_refresh(token).await else {
            return false;
        };
        if record.client_id != caller.client_id {
            return false;
        }
        let count = self.store.revoke_refresh_chain(&digest).await;
        tracing::info!(client_id = %caller.client_id, count, "Refresh token chain revoked");
        true
    }

    async fn revoke_access(&self, token: &str, caller: &RegisteredClient) -> OAuthResult<bool> {
        let keys = self.keys.get_active_keyset().await?;
        let Ok(data) = keys.verify::<AccessTokenClaims>(token, &self.issuer) else {
            return Ok(false);
        };
        if data.claims.client_id.as_deref() != Some(caller.client_id.as_str()) {
            return Ok(false);
        }
        self.store.revoke_jti(&data.claims.jti, data.claims.exp).await;
        tracing::info!(client_id = %caller.client_id, jti = %data.claims.jti, "Access token revoked");
        Ok(true)
    }
}
