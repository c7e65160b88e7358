//! End-to-end authorization code flow through the HTTP router.

mod common;

use axum::http::{StatusCode, header};
use tokio::task::JoinSet;

use authz_server::audit::AuditEventType;
use common::*;

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let server = TestServer::new();

    // authorize without a session goes to the login page
    let uri = authorize_uri("spa", SPA_REDIRECT, "openid profile", Some(&challenge(VERIFIER)));
    let response = server.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let login = location(&response);
    assert!(login.starts_with("/login?flow="));

    let page = server.get(&login, None).await;
    assert_eq!(page.status(), StatusCode::OK);
    assert!(text_body(page).await.contains("name=\"flow\""));

    // login completes the flow and redirects back with code + state
    let flow = query_value(&format!("https://x{login}"), "flow").unwrap();
    let response = server
        .post_form("/login", &[("username", "alice"), ("password", PASSWORD), ("flow", &flow)], None, None)
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(session_cookie(&response).is_some());
    let callback = location(&response);
    assert!(callback.starts_with(SPA_REDIRECT));
    assert_eq!(query_value(&callback, "state").as_deref(), Some("st-1"));
    let code = query_value(&callback, "code").unwrap();

    // token exchange
    let response = server
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
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let tokens = json_body(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert!(tokens["refresh_token"].is_string());

    let access = tokens["access_token"].as_str().unwrap();
    let claims = jwt_claims(access);
    assert_eq!(claims["iss"], ISSUER);
    assert_eq!(claims["sub"], "u-alice");
    assert_eq!(claims["client_id"], "spa");
    let scope = claims["scope"].as_str().unwrap();
    assert!(scope.contains("openid"));
    assert!(scope.contains("profile:read"));
    assert_eq!(tokens["scope"].as_str().unwrap(), scope);

    let id_token = jwt_claims(tokens["id_token"].as_str().unwrap());
    assert_eq!(id_token["aud"], "spa");
    assert_eq!(id_token["nonce"], "n-1");

    // introspection by a confidential client
    let response = server
        .post_form("/oauth2/introspect", &[("token", access)], Some(("web", WEB_SECRET)), None)
        .await;
    let body = json_body(response).await;
    assert_eq!(body["active"], true);
    assert_eq!(body["sub"], "u-alice");
    assert_eq!(body["client_id"], "spa");

    // the owner revokes, after which the token is inactive
    let response = server
        .post_form("/oauth2/revoke", &[("token", access), ("client_id", "spa")], None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .post_form("/oauth2/introspect", &[("token", access)], Some(("web", WEB_SECRET)), None)
        .await;
    let body = json_body(response).await;
    assert_eq!(body, serde_json::json!({ "active": false }));

    assert_eq!(server.audit.of_type(AuditEventType::LoginSuccess).len(), 1);
    assert_eq!(server.audit.of_type(AuditEventType::TokenIssued).len(), 1);
    assert_eq!(server.audit.of_type(AuditEventType::TokenRevoked).len(), 1);
}

#[tokio::test]
async fn test_loopback_redirect_accepts_any_port() {
    let server = TestServer::new();
    let redirect = "http://127.0.0.1:51234/callback";
    let (code, _) = server.login_for_code("cli", redirect, "openid", "alice").await;

    let response = server
        .post_form(
            "/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", redirect),
                ("code_verifier", VERIFIER),
                ("client_id", "cli"),
            ],
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unregistered_redirect_is_not_followed() {
    let server = TestServer::new();
    let uri = authorize_uri("spa", "https://evil.example.com/cb", "openid", Some(&challenge(VERIFIER)));
    let response = server.get(&uri, None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::LOCATION).is_none());
    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_unknown_client_is_not_redirected() {
    let server = TestServer::new();
    let uri = authorize_uri("nobody", SPA_REDIRECT, "openid", None);
    let response = server.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::LOCATION).is_none());
}

#[tokio::test]
async fn test_missing_challenge_redirects_with_error() {
    let server = TestServer::new();
    let uri = authorize_uri("spa", SPA_REDIRECT, "openid", None);
    let response = server.get(&uri, None).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with(SPA_REDIRECT));
    assert_eq!(query_value(&target, "error").as_deref(), Some("invalid_request"));
    assert_eq!(query_value(&target, "state").as_deref(), Some("st-1"));
}

#[tokio::test]
async fn test_wrong_verifier_is_invalid_grant() {
    let server = TestServer::new();
    let (code, _) = server.login_for_code("spa", SPA_REDIRECT, "openid", "alice").await;

    let response = server
        .post_form(
            "/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", SPA_REDIRECT),
                ("code_verifier", "wrong-verifier-wrong-verifier-wrong-verifier-0"),
                ("client_id", "spa"),
            ],
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_code_replay_is_rejected() {
    let server = TestServer::new();
    let (code, _) = server.login_for_code("spa", SPA_REDIRECT, "openid", "alice").await;
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", SPA_REDIRECT),
        ("code_verifier", VERIFIER),
        ("client_id", "spa"),
    ];

    let first = server.post_form("/oauth2/token", &params, None, None).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = server.post_form("/oauth2/token", &params, None, None).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(second).await["error"], "invalid_grant");
    assert_eq!(server.audit.of_type(AuditEventType::AuthorizationCodeReplayed).len(), 1);
}

#[tokio::test]
async fn test_concurrent_redemption_succeeds_once() {
    let server = TestServer::new();
    let (code, _) = server.login_for_code("spa", SPA_REDIRECT, "openid", "alice").await;
    let body = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", SPA_REDIRECT),
        ("code_verifier", VERIFIER),
        ("client_id", "spa"),
    ])
    .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let router = server.router.clone();
        let body = body.clone();
        tasks.spawn(async move {
            use tower::ServiceExt;
            let request = axum::http::Request::post("/oauth2/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(axum::body::Body::from(body))
                .unwrap();
            router.oneshot(request).await.unwrap().status()
        });
    }

    let mut ok = 0;
    while let Some(status) = tasks.join_next().await {
        if status.unwrap() == StatusCode::OK {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn test_bad_password_shows_login_again() {
    let server = TestServer::new();
    let response = server
        .post_form("/login", &[("username", "alice"), ("password", "nope")], None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cookie(&response).is_none());
    assert!(text_body(response).await.contains("Invalid username or password"));
    assert_eq!(server.audit.of_type(AuditEventType::LoginFailure).len(), 1);
}

#[tokio::test]
async fn test_denied_user_is_sent_back_to_login() {
    let server = TestServer::new();
    let uri = authorize_uri("spa", SPA_REDIRECT, "openid", Some(&challenge(VERIFIER)));
    let login = location(&server.get(&uri, None).await);
    let flow = query_value(&format!("https://x{login}"), "flow").unwrap();

    let response = server
        .post_form("/login", &[("username", "mallory"), ("password", PASSWORD), ("flow", &flow)], None, None)
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/login?denied=1");

    let denied = server.audit.of_type(AuditEventType::LoginDenied);
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].details["denyRuleMatchField"], "EMAIL");
    assert_eq!(denied[0].details["denyRuleMatchType"], "EXACT");
    assert!(server.audit.of_type(AuditEventType::AuthorizationCodeIssued).is_empty());
}

#[tokio::test]
async fn test_malformed_regex_rule_blocks_nobody() {
    let server = TestServer::new();
    let response = server
        .post_form("/login", &[("username", "alice"), ("password", PASSWORD)], None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_some());
}

#[tokio::test]
async fn test_existing_session_skips_login() {
    let server = TestServer::new();
    let (_, cookie) = server.login_for_code("spa", SPA_REDIRECT, "openid", "alice").await;

    let uri = authorize_uri("spa", SPA_REDIRECT, "openid", Some(&challenge(VERIFIER)));
    let response = server.get(&uri, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with(SPA_REDIRECT));
    assert!(query_value(&target, "code").is_some());
}

#[tokio::test]
async fn test_consent_flow_for_confidential_client() {
    let server = TestServer::new();
    let uri = authorize_uri("web", WEB_REDIRECT, "openid profile email", Some(&challenge(VERIFIER)));
    let login = location(&server.get(&uri, None).await);
    let flow = query_value(&format!("https://x{login}"), "flow").unwrap();

    let response = server
        .post_form("/login", &[("username", "alice"), ("password", PASSWORD), ("flow", &flow)], None, None)
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), format!("/oauth2/consent?flow={flow}"));
    let cookie = session_cookie(&response).unwrap();

    // the consent page needs the session
    let anonymous = server.get(&format!("/oauth2/consent?flow={flow}"), None).await;
    assert_eq!(anonymous.status(), StatusCode::FOUND);

    let page = server.get(&format!("/oauth2/consent?flow={flow}"), Some(&cookie)).await;
    assert_eq!(page.status(), StatusCode::OK);
    let html = text_body(page).await;
    assert!(html.contains("Web Portal"));
    assert!(html.contains("value=\"email\""));

    // approve only a subset
    let response = server
        .post_form(
            "/oauth2/consent",
            &[("flow", flow.as_str()), ("decision", "approve"), ("scope", "openid"), ("scope", "profile")],
            None,
            Some(&cookie),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let code = query_value(&location(&response), "code").unwrap();

    let response = server
        .post_form(
            "/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", WEB_REDIRECT),
                ("code_verifier", VERIFIER),
            ],
            Some(("web", WEB_SECRET)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let scope = json_body(response).await["scope"].as_str().unwrap().to_string();
    assert!(scope.contains("profile"));
    assert!(!scope.split(' ').any(|s| s == "email"));
    assert_eq!(server.audit.of_type(AuditEventType::ConsentGranted).len(), 1);
}

#[tokio::test]
async fn test_consent_denied_redirects_access_denied() {
    let server = TestServer::new();
    let uri = authorize_uri("web", WEB_REDIRECT, "openid", Some(&challenge(VERIFIER)));
    let login = location(&server.get(&uri, None).await);
    let flow = query_value(&format!("https://x{login}"), "flow").unwrap();
    let response = server
        .post_form("/login", &[("username", "alice"), ("password", PASSWORD), ("flow", &flow)], None, None)
        .await;
    let cookie = session_cookie(&response).unwrap();

    let response = server
        .post_form("/oauth2/consent", &[("flow", flow.as_str()), ("decision", "deny")], None, Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert!(target.starts_with(WEB_REDIRECT));
    assert_eq!(query_value(&target, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_value(&target, "state").as_deref(), Some("st-1"));
}

#[tokio::test]
async fn test_userinfo_returns_profile() {
    let server = TestServer::new();
    let tokens = server.spa_tokens("openid profile").await;
    let access = tokens["access_token"].as_str().unwrap();

    let request = axum::http::Request::get("/userinfo")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["sub"], "u-alice");
    assert_eq!(body["preferred_username"], "alice");
    assert_eq!(body["email"], "alice@example.com");
}

#[tokio::test]
async fn test_userinfo_requires_openid_scope() {
    let server = TestServer::new();
    let tokens = server.spa_tokens("profile").await;
    let access = tokens["access_token"].as_str().unwrap();

    let request = axum::http::Request::get("/userinfo")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_userinfo_rejects_missing_token() {
    let server = TestServer::new();
    let response = server.get("/userinfo", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn test_logout_redirects_only_to_registered_uri() {
    let server = TestServer::new();
    let (_, cookie) = server.login_for_code("spa", SPA_REDIRECT, "openid", "alice").await;

    let response = server
        .get(
            "/connect/logout?client_id=spa&post_logout_redirect_uri=https%3A%2F%2Fapp.example.com%2Fbye&state=s9",
            Some(&cookie),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://app.example.com/bye?state=s9");

    // the old session no longer authenticates
    let uri = authorize_uri("spa", SPA_REDIRECT, "openid", Some(&challenge(VERIFIER)));
    let response = server.get(&uri, Some(&cookie)).await;
    assert!(location(&response).starts_with("/login?flow="));

    let response = server
        .get("/connect/logout?client_id=spa&post_logout_redirect_uri=https%3A%2F%2Fevil.example.com", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.audit.of_type(AuditEventType::Logout).len(), 2);
}
