//! Browser side of the authorization code flow: authorize, login, consent,
//! and the single-use redemption of the resulting code.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::deny::{DenyDecision, DenyListGate};
use super::flow::AuthorizationState;
use super::pkce;
use super::store::{FlowError, OAuthStore, Redemption};
use super::types::{AuthorizationCode, AuthorizationRequest, ValidatedRequest};
use super::validator::{AuthorizationRequestValidator, Rejection};
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::config::Config;
use crate::error::{ErrorCode, OAuthError, OAuthResult};
use crate::models::{DenyRule, Principal, RegisteredClient, ScopeSet, format_scope};
use crate::store::{ClientStore, Stores, UserDirectory, verify_password, with_timeout};

/// What the browser should be told after a step of the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// 302 to the client's redirect URI (code or error).
    RedirectToClient(String),
    /// The flow needs an authenticated user.
    RedirectToLogin { flow_id: String },
    /// The flow needs the user's consent.
    RedirectToConsent { flow_id: String },
    /// The redirect URI could not be trusted; render the error.
    ErrorBody(OAuthError),
    /// A deny rule matched. The session must be dropped and the browser sent
    /// back to the login page with a denial marker.
    Denied,
}

/// A pending consent decision, for rendering.
#[derive(Debug, Clone)]
pub struct ConsentView {
    pub flow_id: String,
    pub client_id: String,
    pub client_name: String,
    pub scopes: ScopeSet,
}

/// A redeemed code ready for token minting.
#[derive(Debug, Clone)]
pub struct RedeemedCode {
    pub digest: String,
    pub code: AuthorizationCode,
}

/// Drives authorization flows through their states.
#[derive(Clone)]
pub struct AuthorizationSessionCoordinator {
    clients: Arc<dyn ClientStore>,
    users: Arc<dyn UserDirectory>,
    store: Arc<OAuthStore>,
    gate: DenyListGate,
    validator: AuthorizationRequestValidator,
    audit: Arc<dyn AuditSink>,
    flow_ttl: Duration,
    store_timeout: Duration,
}

impl AuthorizationSessionCoordinator {
    #[must_use]
    pub fn new(
        config: &Config,
        stores: &Stores,
        store: Arc<OAuthStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            clients: stores.clients.clone(),
            users: stores.users.clone(),
            store,
            gate: DenyListGate::new(stores.deny_rules.clone(), config.store_timeout),
            validator: AuthorizationRequestValidator::new(config.allow_plain_pkce),
            audit,
            flow_ttl: config.flow_ttl,
            store_timeout: config.store_timeout,
        }
    }

    async fn find_client(&self, client_id: &str) -> OAuthResult<Option<RegisteredClient>> {
        let client = with_timeout(self.store_timeout, self.clients.find_by_client_id(client_id)).await?;
        Ok(client.filter(|c| c.enabled))
    }

    /// Handle `GET /oauth2/authorize`. `session` is the principal of an
    /// existing browser session, if any.
    pub async fn begin(&self, request: &AuthorizationRequest, session: Option<&Principal>) -> AuthorizeOutcome {
        let Some(client_id) = request.client_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            return AuthorizeOutcome::ErrorBody(OAuthError::invalid_request("Missing client_id"));
        };
        let client = match self.find_client(client_id).await {
            Ok(Some(client)) => client,
            Ok(None) => {
                return AuthorizeOutcome::ErrorBody(OAuthError::invalid_request("Unknown client"));
            }
            Err(err) => return AuthorizeOutcome::ErrorBody(err),
        };

        let validated = match self.validator.validate(request, &client) {
            Ok(validated) => validated,
            Err(Rejection::Body(error)) => return AuthorizeOutcome::ErrorBody(error),
            Err(Rejection::Redirect { error, redirect_uri, state }) => {
                return error_redirect(&redirect_uri, &error, state.as_deref());
            }
        };

        let flow_id = self.store.create_flow(validated.clone(), self.flow_ttl).await;
        tracing::debug!(client_id = %client.client_id, "Authorization flow started");

        match session {
            Some(principal) => match self.authenticate(&flow_id, principal.clone()).await {
                Ok(outcome) => outcome,
                Err(error) => error_redirect(&validated.redirect_uri, &error, validated.state.as_deref()),
            },
            None => AuthorizeOutcome::RedirectToLogin { flow_id },
        }
    }

    /// Verify a username/password pair against the user directory.
    /// A miss is audited as LOGIN_FAILURE.
    pub async fn verify_credentials(&self, username: &str, password: &str) -> OAuthResult<Option<Principal>> {
        let account = with_timeout(self.store_timeout, self.users.find_by_username(username)).await?;
        match verify_password(account, password).await {
            Some(account) => Ok(Some(account.to_principal())),
            None => {
                tracing::info!(username = %username, "Login failed");
                self.audit
                    .publish(AuditEvent::new(AuditEventType::LoginFailure).principal(username))
                    .await;
                Ok(None)
            }
        }
    }

    /// Attach an identity to a flow. Every login path (form, existing
    /// session, federated) enters here, so the deny list always runs before
    /// the flow leaves `Unauthenticated`.
    pub async fn authenticate(&self, flow_id: &str, principal: Principal) -> OAuthResult<AuthorizeOutcome> {
        let flow = self.store.get_flow(flow_id).await.ok_or_else(flow_not_found)?;

        if !self.admit(&principal, Some(flow.request.client_id.as_str())).await? {
            // Best effort: the flow may already be gone.
            let _ = self.store.transition_flow(flow_id, AuthorizationState::abandon).await;
            return Ok(AuthorizeOutcome::Denied);
        }

        self.store
            .transition_flow(flow_id, |state| state.authenticate(principal.clone()))
            .await
            .map_err(flow_error)?;
        self.advance(flow_id, &principal, &flow.request).await
    }

    /// Run the deny list for a freshly authenticated principal and audit the
    /// result. Returns whether the login may proceed.
    pub async fn admit(&self, principal: &Principal, client_id: Option<&str>) -> OAuthResult<bool> {
        if let DenyDecision::Deny(rule) = self.gate.check_principal(principal).await? {
            self.audit_denied(principal, &rule, client_id).await;
            return Ok(false);
        }

        let mut event = AuditEvent::new(AuditEventType::LoginSuccess)
            .principal(principal.subject.clone())
            .detail("provider", principal.provider.clone());
        if let Some(client_id) = client_id {
            event = event.client(client_id);
        }
        self.audit.publish(event).await;
        Ok(true)
    }

    /// After authentication: ask for consent, or go straight to the code.
    async fn advance(
        &self,
        flow_id: &str,
        principal: &Principal,
        request: &ValidatedRequest,
    ) -> OAuthResult<AuthorizeOutcome> {
        let client = self
            .find_client(&request.client_id)
            .await?
            .ok_or_else(|| OAuthError::invalid_request("Unknown client"))?;

        if client.require_consent {
            let remembered = self.store.consented_scopes(&client.client_id, &principal.subject).await;
            if !request.scopes.is_subset(&remembered) {
                self.store
                    .transition_flow(flow_id, AuthorizationState::require_consent)
                    .await
                    .map_err(flow_error)?;
                return Ok(AuthorizeOutcome::RedirectToConsent { flow_id: flow_id.to_string() });
            }
        }

        let scopes = request.scopes.clone();
        self.store
            .transition_flow(flow_id, |state| state.grant_consent(scopes))
            .await
            .map_err(flow_error)?;
        self.finish(flow_id, &client, principal).await
    }

    async fn finish(
        &self,
        flow_id: &str,
        client: &RegisteredClient,
        principal: &Principal,
    ) -> OAuthResult<AuthorizeOutcome> {
        let (code, request) = self
            .store
            .issue_code(flow_id, client.token_settings.code_ttl())
            .await
            .map_err(flow_error)?;

        self.audit
            .publish(
                AuditEvent::new(AuditEventType::AuthorizationCodeIssued)
                    .principal(principal.subject.clone())
                    .client(client.client_id.clone()),
            )
            .await;

        let mut url = Url::parse(&request.redirect_uri).map_err(|_| OAuthError::server_error())?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &request.state {
                query.append_pair("state", state);
            }
        }
        Ok(AuthorizeOutcome::RedirectToClient(url.into()))
    }

    /// The consent screen contents for a flow owned by `subject`.
    pub async fn consent_view(&self, flow_id: &str, subject: &str) -> OAuthResult<ConsentView> {
        let flow = self.store.get_flow(flow_id).await.ok_or_else(flow_not_found)?;
        pending_owner(&flow.state, subject)?;
        let client = self
            .find_client(&flow.request.client_id)
            .await?
            .ok_or_else(|| OAuthError::invalid_request("Unknown client"))?;
        Ok(ConsentView {
            flow_id: flow.id,
            client_id: client.client_id.clone(),
            client_name: client.display_name().to_string(),
            scopes: flow.request.scopes,
        })
    }

    /// Record the user's consent decision. Approved scopes are intersected
    /// with the requested ones; a denial sends `access_denied` to the client.
    pub async fn consent(
        &self,
        flow_id: &str,
        subject: &str,
        approve: bool,
        approved: &ScopeSet,
    ) -> OAuthResult<AuthorizeOutcome> {
        let flow = self.store.get_flow(flow_id).await.ok_or_else(flow_not_found)?;
        let principal = pending_owner(&flow.state, subject)?.clone();
        let request = flow.request;

        if !approve {
            self.store
                .transition_flow(flow_id, AuthorizationState::abandon)
                .await
                .map_err(flow_error)?;
            self.audit
                .publish(
                    AuditEvent::new(AuditEventType::ConsentDenied)
                        .principal(subject)
                        .client(request.client_id.clone()),
                )
                .await;
            let error = OAuthError::new(ErrorCode::AccessDenied, "The resource owner denied the request");
            return Ok(error_redirect(&request.redirect_uri, &error, request.state.as_deref()));
        }

        let client = self
            .find_client(&request.client_id)
            .await?
            .ok_or_else(|| OAuthError::invalid_request("Unknown client"))?;
        let granted: ScopeSet = request.scopes.intersection(approved).cloned().collect();

        self.store
            .transition_flow(flow_id, |state| state.grant_consent(granted.clone()))
            .await
            .map_err(flow_error)?;
        self.store.remember_consent(&client.client_id, subject, &granted).await;
        self.audit
            .publish(
                AuditEvent::new(AuditEventType::ConsentGranted)
                    .principal(subject)
                    .client(client.client_id.clone())
                    .detail("scope", format_scope(&granted)),
            )
            .await;

        self.finish(flow_id, &client, &principal).await
    }

    /// Redeem a code at the token endpoint.
    ///
    /// The code is consumed before any binding is checked, so a wrong
    /// verifier or redirect URI burns it. Every failure is a generic
    /// `invalid_grant`.
    pub async fn redeem(
        &self,
        code: &str,
        client: &RegisteredClient,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> OAuthResult<RedeemedCode> {
        let (digest, record) = match self.store.redeem_code(code).await {
            Redemption::Redeemed { digest, code } => (digest, *code),
            Redemption::Replayed { client_id } => {
                tracing::warn!(client_id = %client_id, "Authorization code replayed; derived tokens revoked");
                self.audit
                    .publish(AuditEvent::new(AuditEventType::AuthorizationCodeReplayed).client(client_id))
                    .await;
                return Err(OAuthError::invalid_grant());
            }
            Redemption::Invalid => return Err(OAuthError::invalid_grant()),
        };

        let request = &record.request;
        if request.client_id != client.client_id {
            tracing::debug!(client_id = %client.client_id, "Code presented by another client");
            return Err(OAuthError::invalid_grant());
        }
        if request.redirect_uri_supplied && redirect_uri != Some(request.redirect_uri.as_str()) {
            return Err(OAuthError::invalid_grant());
        }
        if let Some(challenge) = &request.code_challenge {
            let method = request.code_challenge_method.unwrap_or(pkce::CodeChallengeMethod::S256);
            let verified = code_verifier.is_some_and(|verifier| pkce::verify(method, verifier, challenge));
            if !verified {
                return Err(OAuthError::invalid_grant());
            }
        } else if client.require_proof_key {
            return Err(OAuthError::invalid_grant());
        }

        Ok(RedeemedCode { digest, code: record })
    }

    async fn audit_denied(&self, principal: &Principal, rule: &DenyRule, client_id: Option<&str>) {
        tracing::info!(
            subject = %principal.subject,
            rule_id = %rule.id,
            "Login denied by deny rule"
        );
        let mut event = AuditEvent::new(AuditEventType::LoginDenied).principal(principal.subject.clone());
        if let Some(client_id) = client_id {
            event = event.client(client_id);
        }
        self.audit
            .publish(
                event
                    .detail("provider", principal.provider.clone())
                    .detail("username", principal.username.clone().unwrap_or_default())
                    .detail("denyRuleId", rule.id.clone())
                    .detail("denyRuleProvider", rule.provider.clone().unwrap_or_else(|| "*".into()))
                    .detail("denyRuleMatchField", rule.match_field.as_str())
                    .detail("denyRuleMatchType", rule.match_type.as_str()),
            )
            .await;
    }
}

impl std::fmt::Debug for AuthorizationSessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationSessionCoordinator")
            .field("flow_ttl", &self.flow_ttl)
            .finish()
    }
}

fn flow_not_found() -> OAuthError {
    OAuthError::invalid_request("Authorization request not found or expired")
}

fn flow_error(err: FlowError) -> OAuthError {
    tracing::debug!(error = %err, "Authorization flow step rejected");
    flow_not_found()
}

fn pending_owner<'a>(state: &'a AuthorizationState, subject: &str) -> OAuthResult<&'a Principal> {
    match state {
        AuthorizationState::ConsentPending { principal } if principal.subject == subject => Ok(&**principal),
        _ => Err(flow_not_found()),
    }
}

/// Redirect carrying an OAuth error to an already validated URI.
fn error_redirect(redirect_uri: &str, error: &OAuthError, state: Option<&str>) -> AuthorizeOutcome {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        return AuthorizeOutcome::ErrorBody(error.clone());
    };
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("error", error.code.as_str());
        query.append_pair("error_description", &error.description);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    AuthorizeOutcome::RedirectToClient(url.into())
}
