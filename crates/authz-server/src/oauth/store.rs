//! In-memory protocol state: flows, codes, consents, refresh tokens and the
//! revoked access-token registry.
//!
//! Codes and refresh tokens are keyed by the SHA-256 digest of their value,
//! so a dump of the store never yields a usable credential. Locks are always
//! taken in the order codes, refresh tokens, revoked jtis.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::flow::{AuthorizationState, TransitionError};
use super::types::{
    AuthorizationCode, AuthorizationFlow, IssuedAccessToken, RefreshRecord, ValidatedRequest,
};
use crate::models::ScopeSet;

/// Failure to advance a browser flow.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Authorization flow not found or expired")]
    NotFound,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Result of presenting an authorization code.
#[derive(Debug)]
pub enum Redemption {
    /// First successful presentation.
    Redeemed { digest: String, code: Box<AuthorizationCode> },
    /// The code was already exchanged; it is now revoked.
    Replayed { client_id: String },
    /// Unknown, expired or revoked.
    Invalid,
}

/// In-memory OAuth state store.
#[derive(Clone)]
pub struct OAuthStore {
    flows: Arc<RwLock<HashMap<String, AuthorizationFlow>>>,
    codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    consents: Arc<RwLock<HashMap<(String, String), ScopeSet>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshRecord>>>,
    revoked_jtis: Arc<RwLock<HashMap<String, i64>>>,
}

impl OAuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            codes: Arc::new(RwLock::new(HashMap::new())),
            consents: Arc::new(RwLock::new(HashMap::new())),
            refresh_tokens: Arc::new(RwLock::new(HashMap::new())),
            revoked_jtis: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate a random token using two UUIDs (256 bits).
    #[must_use]
    pub fn generate_token() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Storage key for a code or refresh token.
    #[must_use]
    pub fn digest(token: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
    }

    // ─── Flows ───────────────────────────────────────────────────────────────

    /// Start a flow in `Unauthenticated`. Returns its id.
    pub async fn create_flow(&self, request: ValidatedRequest, lifetime: Duration) -> String {
        let id = Self::generate_token();
        self.flows.write().await.insert(
            id.clone(),
            AuthorizationFlow {
                id: id.clone(),
                request,
                state: AuthorizationState::Unauthenticated,
                created_at: Instant::now(),
                lifetime,
            },
        );
        id
    }

    /// Look up a live flow.
    pub async fn get_flow(&self, id: &str) -> Option<AuthorizationFlow> {
        let flows = self.flows.read().await;
        flows.get(id).filter(|f| !f.is_expired() && !f.state.is_terminal()).cloned()
    }

    /// Apply a state transition to a live flow.
    pub async fn transition_flow<F>(&self, id: &str, transition: F) -> Result<AuthorizationFlow, FlowError>
    where
        F: FnOnce(AuthorizationState) -> Result<AuthorizationState, TransitionError>,
    {
        let mut flows = self.flows.write().await;
        let flow = flows.get_mut(id).ok_or(FlowError::NotFound)?;
        if flow.is_expired() {
            flows.remove(id);
            return Err(FlowError::NotFound);
        }
        flow.state = transition(flow.state.clone())?;
        let snapshot = flow.clone();
        if snapshot.state.is_terminal() {
            flows.remove(id);
        }
        Ok(snapshot)
    }

    /// Turn a `ConsentGranted` flow into an authorization code. The flow is
    /// consumed. Returns the code value and the request it answers.
    pub async fn issue_code(&self, flow_id: &str, lifetime: Duration) -> Result<(String, ValidatedRequest), FlowError> {
        let flow = {
            let mut flows = self.flows.write().await;
            let flow = flows.remove(flow_id).ok_or(FlowError::NotFound)?;
            if flow.is_expired() {
                return Err(FlowError::NotFound);
            }
            flow
        };

        let AuthorizationState::ConsentGranted { principal, scopes } = flow.state.clone() else {
            return Err(FlowError::Transition(TransitionError {
                from: flow.state.name(),
                to: "CODE_ISSUED",
            }));
        };
        let state = flow.state.issue_code()?;

        let code = Self::generate_token();
        self.codes.write().await.insert(
            Self::digest(&code),
            AuthorizationCode {
                request: flow.request.clone(),
                principal: *principal,
                scopes,
                state,
                issued_at: Instant::now(),
                lifetime,
                refresh_digest: None,
                access_tokens: Vec::new(),
            },
        );
        Ok((code, flow.request))
    }

    // ─── Codes ───────────────────────────────────────────────────────────────

    /// Atomically move a code from `CodeIssued` to `Redeemed`. Exactly one
    /// concurrent caller wins; a presentation after redemption is a replay
    /// and revokes the code together with every token minted from it.
    pub async fn redeem_code(&self, code: &str) -> Redemption {
        let digest = Self::digest(code);
        let replayed = {
            let mut codes = self.codes.write().await;
            let Some(record) = codes.get_mut(&digest) else {
                return Redemption::Invalid;
            };

            match record.state {
                AuthorizationState::CodeIssued if record.is_expired() => {
                    if let Ok(expired) = record.state.clone().expire() {
                        record.state = expired;
                    }
                    return Redemption::Invalid;
                }
                AuthorizationState::CodeIssued => match record.state.clone().redeem() {
                    Ok(redeemed) => {
                        record.state = redeemed;
                        return Redemption::Redeemed { digest, code: Box::new(record.clone()) };
                    }
                    Err(_) => return Redemption::Invalid,
                },
                AuthorizationState::Redeemed => {
                    if let Ok(revoked) = record.state.clone().revoke() {
                        record.state = revoked;
                    }
                    (
                        record.request.client_id.clone(),
                        record.refresh_digest.clone(),
                        std::mem::take(&mut record.access_tokens),
                    )
                }
                _ => return Redemption::Invalid,
            }
        };

        let (client_id, refresh_digest, access_tokens) = replayed;
        self.revoke_access_tokens(&access_tokens).await;
        if let Some(refresh) = refresh_digest {
            self.revoke_refresh_chain(&refresh).await;
        }
        Redemption::Replayed { client_id }
    }

    /// Record the tokens minted from a redeemed code. If the code was replayed
    /// in the meantime the tokens are revoked immediately.
    pub async fn attach_tokens_to_code(
        &self,
        code_digest: &str,
        refresh_digest: Option<String>,
        access: IssuedAccessToken,
    ) {
        let revoked_meanwhile = {
            let mut codes = self.codes.write().await;
            match codes.get_mut(code_digest) {
                Some(record) if record.state == AuthorizationState::Redeemed => {
                    record.refresh_digest.clone_from(&refresh_digest);
                    record.access_tokens.push(access.clone());
                    false
                }
                _ => true,
            }
        };

        if revoked_meanwhile {
            self.revoke_access_tokens(std::slice::from_ref(&access)).await;
            if let Some(refresh) = refresh_digest {
                self.revoke_refresh_chain(&refresh).await;
            }
        }
    }

    // ─── Consents ────────────────────────────────────────────────────────────

    /// Remember scopes a subject granted to a client.
    pub async fn remember_consent(&self, client_id: &str, subject: &str, scopes: &ScopeSet) {
        let mut consents = self.consents.write().await;
        consents
            .entry((client_id.to_string(), subject.to_string()))
            .or_default()
            .extend(scopes.iter().cloned());
    }

    /// Scopes previously granted by `subject` to `client_id`.
    pub async fn consented_scopes(&self, client_id: &str, subject: &str) -> ScopeSet {
        let consents = self.consents.read().await;
        consents
            .get(&(client_id.to_string(), subject.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    // ─── Refresh tokens ──────────────────────────────────────────────────────

    /// Persist a new refresh token. Returns its value and digest.
    pub async fn create_refresh_token(&self, record: RefreshRecord) -> (String, String) {
        let token = Self::generate_token();
        let digest = Self::digest(&token);
        self.refresh_tokens.write().await.insert(digest.clone(), record);
        (token, digest)
    }

    pub async fn find_refresh(&self, token: &str) -> Option<(String, RefreshRecord)> {
        let digest = Self::digest(token);
        let tokens = self.refresh_tokens.read().await;
        tokens.get(&digest).cloned().map(|record| (digest, record))
    }

    /// Replace an active refresh token with a new one. Fails when the old
    /// token was rotated or revoked concurrently.
    pub async fn rotate_refresh(&self, old_digest: &str, replacement: RefreshRecord) -> Option<(String, String)> {
        let token = Self::generate_token();
        let digest = Self::digest(&token);

        let mut tokens = self.refresh_tokens.write().await;
        let old = tokens.get_mut(old_digest)?;
        if !old.is_active() {
            return None;
        }
        old.replaced_by = Some(digest.clone());
        tokens.insert(digest.clone(), replacement);
        Some((token, digest))
    }

    /// Track an access token minted from a refresh token.
    pub async fn record_refresh_access(&self, digest: &str, access: IssuedAccessToken) {
        if let Some(record) = self.refresh_tokens.write().await.get_mut(digest) {
            record.access_tokens.push(access);
        }
    }

    /// Revoke a refresh token, every token that replaced it, and all access
    /// tokens minted from any of them. Returns how many refresh tokens were
    /// newly revoked.
    pub async fn revoke_refresh_chain(&self, digest: &str) -> usize {
        let mut access = Vec::new();
        let mut revoked = 0;
        {
            let mut tokens = self.refresh_tokens.write().await;
            let mut next = Some(digest.to_string());
            while let Some(current) = next.take() {
                let Some(record) = tokens.get_mut(&current) else {
                    break;
                };
                if !record.revoked {
                    record.revoked = true;
                    revoked += 1;
                }
                access.append(&mut record.access_tokens);
                next = record.replaced_by.clone();
            }
        }
        self.revoke_access_tokens(&access).await;
        revoked
    }

    // ─── Access token registry ───────────────────────────────────────────────

    /// Deny an access token until its own expiry.
    pub async fn revoke_jti(&self, jti: &str, expires_at: i64) {
        self.revoked_jtis.write().await.insert(jti.to_string(), expires_at);
    }

    async fn revoke_access_tokens(&self, tokens: &[IssuedAccessToken]) {
        if tokens.is_empty() {
            return;
        }
        let mut revoked = self.revoked_jtis.write().await;
        for token in tokens {
            revoked.insert(token.jti.clone(), token.expires_at);
        }
    }

    pub async fn is_jti_revoked(&self, jti: &str) -> bool {
        self.revoked_jtis.read().await.contains_key(jti)
    }

    // ─── Cleanup ─────────────────────────────────────────────────────────────

    /// Start background cleanup task for expired flows, codes and tokens.
    pub fn start_cleanup_task(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    pub async fn cleanup_expired(&self) {
        let now = chrono::Utc::now().timestamp();

        self.flows.write().await.retain(|_, flow| !flow.is_expired());

        // Redeemed codes stay until their TTL so replays can still be detected.
        {
            let mut codes = self.codes.write().await;
            let before = codes.len();
            codes.retain(|_, code| !code.is_expired());
            let removed = before - codes.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired authorization codes");
            }
        }

        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| token.expires_at > now);
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired refresh tokens");
            }
        }

        self.revoked_jtis.write().await.retain(|_, expires_at| *expires_at > now);
    }
}

impl Default for OAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Principal;

    fn request() -> ValidatedRequest {
        ValidatedRequest {
            client_id: "client1".into(),
            redirect_uri: "http://127.0.0.1:8080/callback".into(),
            redirect_uri_supplied: true,
            scopes: ["openid".to_string()].into(),
            state: Some("xyz".into()),
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
        }
    }

    async fn issued_code(store: &OAuthStore, lifetime: Duration) -> String {
        let flow = store.create_flow(request(), Duration::from_secs(60)).await;
        store
            .transition_flow(&flow, |s| s.authenticate(Principal::for_client("alice")))
            .await
            .unwrap();
        store
            .transition_flow(&flow, |s| s.grant_consent(["openid".to_string()].into()))
            .await
            .unwrap();
        store.issue_code(&flow, lifetime).await.unwrap().0
    }

    fn refresh_record(client_id: &str) -> RefreshRecord {
        RefreshRecord {
            client_id: client_id.into(),
            principal: Principal::for_client("alice"),
            scopes: ScopeSet::new(),
            nonce: None,
            expires_at: chrono::Utc::now().timestamp() + 3600,
            access_tokens: Vec::new(),
            replaced_by: None,
            revoked: false,
        }
    }

    #[tokio::test]
    async fn test_auth_code_lifecycle() {
        let store = OAuthStore::new();
        let code = issued_code(&store, Duration::from_secs(60)).await;

        // First redemption succeeds
        let Redemption::Redeemed { code: record, .. } = store.redeem_code(&code).await else {
            panic!("expected redemption");
        };
        assert_eq!(record.request.client_id, "client1");
        assert_eq!(record.state, AuthorizationState::Redeemed);

        // Second is a replay, third finds a revoked code
        assert!(matches!(store.redeem_code(&code).await, Redemption::Replayed { .. }));
        assert!(matches!(store.redeem_code(&code).await, Redemption::Invalid));
    }

    #[tokio::test]
    async fn test_unknown_and_expired_codes() {
        let store = OAuthStore::new();
        assert!(matches!(store.redeem_code("nope").await, Redemption::Invalid));

        let code = issued_code(&store, Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(store.redeem_code(&code).await, Redemption::Invalid));
    }

    #[tokio::test]
    async fn test_issue_code_requires_consent() {
        let store = OAuthStore::new();
        let flow = store.create_flow(request(), Duration::from_secs(60)).await;
        assert!(matches!(
            store.issue_code(&flow, Duration::from_secs(60)).await,
            Err(FlowError::Transition(_))
        ));
        // The flow is consumed by the failed attempt
        assert!(store.get_flow(&flow).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_redemption_single_winner() {
        let store = Arc::new(OAuthStore::new());
        let code = issued_code(&store, Duration::from_secs(60)).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let code = code.clone();
                tokio::spawn(async move {
                    matches!(store.redeem_code(&code).await, Redemption::Redeemed { .. })
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_replay_revokes_minted_tokens() {
        let store = OAuthStore::new();
        let code = issued_code(&store, Duration::from_secs(60)).await;
        let Redemption::Redeemed { digest, .. } = store.redeem_code(&code).await else {
            panic!("expected redemption");
        };

        let (_, refresh_digest) = store.create_refresh_token(refresh_record("client1")).await;
        let access = IssuedAccessToken { jti: "jti-1".into(), expires_at: chrono::Utc::now().timestamp() + 60 };
        store.attach_tokens_to_code(&digest, Some(refresh_digest.clone()), access).await;

        assert!(matches!(store.redeem_code(&code).await, Redemption::Replayed { .. }));
        assert!(store.is_jti_revoked("jti-1").await);
        let tokens = store.refresh_tokens.read().await;
        assert!(tokens[&refresh_digest].revoked);
    }

    #[tokio::test]
    async fn test_consents_accumulate() {
        let store = OAuthStore::new();
        store.remember_consent("c", "alice", &["a".to_string()].into()).await;
        store.remember_consent("c", "alice", &["b".to_string()].into()).await;
        assert_eq!(store.consented_scopes("c", "alice").await.len(), 2);
        assert!(store.consented_scopes("c", "bob").await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_chain_revocation() {
        let store = OAuthStore::new();
        let (_, digest) = store.create_refresh_token(refresh_record("client1")).await;

        let (_, second) = store.rotate_refresh(&digest, refresh_record("client1")).await.unwrap();
        store
            .record_refresh_access(&second, IssuedAccessToken { jti: "a2".into(), expires_at: i64::MAX })
            .await;

        // The rotated token cannot rotate again
        assert!(store.rotate_refresh(&digest, refresh_record("client1")).await.is_none());

        assert_eq!(store.revoke_refresh_chain(&digest).await, 2);
        assert!(store.is_jti_revoked("a2").await);
    }

    #[tokio::test]
    async fn test_cleanup_purges_expired() {
        let store = OAuthStore::new();
        let mut record = refresh_record("client1");
        record.expires_at = chrono::Utc::now().timestamp() - 1;
        let (token, _) = store.create_refresh_token(record).await;
        store.revoke_jti("old", chrono::Utc::now().timestamp() - 1).await;
        store.revoke_jti("live", chrono::Utc::now().timestamp() + 60).await;

        store.cleanup_expired().await;

        assert!(store.find_refresh(&token).await.is_none());
        assert!(!store.is_jti_revoked("old").await);
        assert!(store.is_jti_revoked("live").await);
    }
}
