//! Shared fixture: an in-process authorization server with seeded clients,
//! users and deny rules, signing with a freshly generated ES256 key.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use authz_server::audit::MemoryAuditSink;
use authz_server::config::Config;
use authz_server::credentials::hash_secret;
use authz_server::keys::{KeySet, SigningKey, SigningKeyProvider, generate_es256};
use authz_server::models::{
    ClientAuthMethod, DenyRule, GrantType, MatchField, MatchType, RegisteredClient, TokenSettings, UserAccount,
};
use authz_server::server::AuthorizationServer;
use authz_server::store::{MemoryStore, StateDocument, Stores};
use authz_server::token::SelfServiceScopesCustomizer;

pub const ISSUER: &str = "https://auth.example.com";
pub const SPA_REDIRECT: &str = "https://app.example.com/cb";
pub const WEB_REDIRECT: &str = "https://web.example.com/cb";
pub const CLI_REDIRECT: &str = "http://127.0.0.1:8080/callback";
pub const WEB_SECRET: &str = "web-secret";
pub const SVC_SECRET: &str = "svc-secret";
pub const PASSWORD: &str = "correct horse battery staple";

/// RFC 7636 Appendix B verifier.
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

/// Argon2 is slow in debug builds; hash each secret once per test binary.
fn hashed(secret: &'static str) -> String {
    static HASHES: OnceLock<HashMap<&'static str, String>> = OnceLock::new();
    HASHES
        .get_or_init(|| {
            [WEB_SECRET, SVC_SECRET, PASSWORD]
                .into_iter()
                .map(|s| (s, hash_secret(s).unwrap()))
                .collect()
        })
        .get(secret)
        .cloned()
        .unwrap()
}

pub fn challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn clients() -> Vec<RegisteredClient> {
    vec![
        RegisteredClient {
            client_id: "spa".into(),
            client_name: Some("Single Page App".into()),
            grant_types: [GrantType::AuthorizationCode, GrantType::RefreshToken].into(),
            auth_methods: [ClientAuthMethod::None].into(),
            redirect_uris: vec![SPA_REDIRECT.into()],
            post_logout_redirect_uris: vec!["https://app.example.com/bye".into()],
            scopes: ["openid".to_string(), "profile".to_string()].into(),
            require_proof_key: true,
            ..RegisteredClient::default()
        },
        RegisteredClient {
            client_id: "web".into(),
            client_name: Some("Web Portal".into()),
            client_secret_hash: Some(hashed(WEB_SECRET)),
            grant_types: [GrantType::AuthorizationCode, GrantType::RefreshToken].into(),
            auth_methods: [ClientAuthMethod::ClientSecretBasic, ClientAuthMethod::ClientSecretPost].into(),
            redirect_uris: vec![WEB_REDIRECT.into()],
            scopes: ["openid".to_string(), "profile".to_string(), "email".to_string()].into(),
            require_consent: true,
            ..RegisteredClient::default()
        },
        RegisteredClient {
            client_id: "cli".into(),
            grant_types: [GrantType::AuthorizationCode].into(),
            auth_methods: [ClientAuthMethod::None].into(),
            redirect_uris: vec![CLI_REDIRECT.into()],
            scopes: ["openid".to_string()].into(),
            require_proof_key: true,
            ..RegisteredClient::default()
        },
        RegisteredClient {
            client_id: "svc".into(),
            client_secret_hash: Some(hashed(SVC_SECRET)),
            grant_types: [GrantType::ClientCredentials].into(),
            auth_methods: [ClientAuthMethod::ClientSecretBasic].into(),
            scopes: ["api:read".to_string(), "api:write".to_string()].into(),
            token_settings: TokenSettings { access_token_ttl_secs: 120, ..TokenSettings::default() },
            ..RegisteredClient::default()
        },
    ]
}

fn users() -> Vec<UserAccount> {
    let user = |subject: &str, username: &str, email: &str, roles: &[&str]| UserAccount {
        subject: subject.into(),
        username: username.into(),
        email: Some(email.into()),
        password_hash: hashed(PASSWORD),
        roles: roles.iter().map(|r| (*r).to_string()).collect(),
        enabled: true,
    };
    vec![
        user("u-alice", "alice", "alice@example.com", &[]),
        user("u-bob", "bob", "bob@example.com", &["ROLE_ADMIN"]),
        user("u-mallory", "mallory", "Blocked@Example.com ", &[]),
    ]
}

fn deny_rules() -> Vec<DenyRule> {
    let rule = |field, match_type, pattern: &str| DenyRule {
        id: String::new(),
        enabled: true,
        provider: None,
        match_field: field,
        match_type,
        pattern: pattern.into(),
        normalized_value: None,
        reason: None,
    };
    vec![
        rule(MatchField::Email, MatchType::Exact, "blocked@example.com"),
        // Malformed on purpose: must never block anyone.
        rule(MatchField::Username, MatchType::Regex, "(["),
    ]
}

pub struct TestServer {
    pub router: Router,
    pub server: AuthorizationServer,
    pub audit: MemoryAuditSink,
    pub backend: Arc<MemoryStore>,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(Config::for_testing(ISSUER))
    }

    pub fn with_config(config: Config) -> Self {
        let document = StateDocument { clients: clients(), deny_rules: deny_rules(), users: users() };
        let backend = Arc::new(MemoryStore::from_document(document).unwrap());

        let key = SigningKey::from_private_jwk(&generate_es256()).unwrap();
        let keys = SigningKeyProvider::new(
            None,
            Some(KeySet::new(vec![key]).unwrap()),
            Duration::from_secs(300),
            Duration::from_secs(1),
        )
        .unwrap();

        let audit = MemoryAuditSink::new();
        let customizer = SelfServiceScopesCustomizer::from_config(&config);
        let server = AuthorizationServer::new(
            config,
            Stores::from_backend(backend.clone()),
            Arc::new(keys),
            Arc::new(audit.clone()),
            Arc::new(customizer),
        );
        Self { router: server.router(), server, audit, backend }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(
        &self,
        uri: &str,
        params: &[(&str, &str)],
        basic: Option<(&str, &str)>,
        cookie: Option<&str>,
    ) -> Response<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some((id, secret)) = basic {
            let encoded = STANDARD.encode(format!("{id}:{secret}"));
            builder = builder.header(header::AUTHORIZATION, format!("Basic {encoded}"));
        }
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let body = serde_urlencoded::to_string(params).unwrap();
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Run authorize + login for `client_id` and return the code and the
    /// session cookie.
    pub async fn login_for_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        username: &str,
    ) -> (String, String) {
        let uri = authorize_uri(client_id, redirect_uri, scope, Some(&challenge(VERIFIER)));
        let response = self.get(&uri, None).await;
        let login = location(&response);
        let flow = query_value(&format!("https://x{login}"), "flow").unwrap();

        let response = self
            .post_form("/login", &[("username", username), ("password", PASSWORD), ("flow", &flow)], None, None)
            .await;
        let cookie = session_cookie(&response).unwrap();
        let code = query_value(&location(&response), "code").unwrap();
        (code, cookie)
    }

    /// `spa` code exchanged for tokens.
    pub async fn spa_tokens(&self, scope: &str) -> serde_json::Value {
        let (code, _) = self.login_for_code("spa", SPA_REDIRECT, scope, "alice").await;
        let response = self
            .post_form(
                "/oauth2/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", &code),
                    ("redirect_uri", SPA_REDIRECT),
                    ("code_verifier", VERIFIER),
                    ("client_id", "spa"),
                ],
                None,
                None,
            )
            .await;
        assert_eq!(response.status(), 200);
        json_body(response).await
    }
}

pub fn authorize_uri(client_id: &str, redirect_uri: &str, scope: &str, challenge: Option<&str>) -> String {
    let mut params = vec![
        ("response_type", "code"),
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("scope", scope),
        ("state", "st-1"),
        ("nonce", "n-1"),
    ];
    if let Some(challenge) = challenge {
        params.push(("code_challenge", challenge));
        params.push(("code_challenge_method", "S256"));
    }
    format!("/oauth2/authorize?{}", serde_urlencoded::to_string(params).unwrap())
}

pub fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION].to_str().unwrap().to_string()
}

pub fn query_value(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// `name=value` of the session cookie set by a response.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("authz_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub async fn text_body(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// Decode a JWT payload without verifying it.
pub fn jwt_claims(token: &str) -> serde_json::Value {
    let payload = token.split('.').nth(1).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}
