//! Browser sessions: the authenticated principal behind the
//! `authz_session` cookie, held in an idle-expiring cache.

use std::time::Duration;

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use moka::future::Cache;

use crate::config::defaults;
use crate::models::Principal;
use crate::oauth::OAuthStore;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "authz_session";

/// Server-side browser sessions keyed by an opaque cookie value.
#[derive(Clone)]
pub struct BrowserSessions {
    sessions: Cache<String, Principal>,
    secure: bool,
}

impl BrowserSessions {
    /// `secure` marks the cookie `Secure` (set when the issuer is https).
    #[must_use]
    pub fn new(idle_ttl: Duration, secure: bool) -> Self {
        let sessions = Cache::builder()
            .max_capacity(defaults::SESSION_MAX_CAPACITY)
            .time_to_idle(idle_ttl)
            .build();
        Self { sessions, secure }
    }

    /// Principal of the session named by the request cookies.
    pub async fn current(&self, jar: &CookieJar) -> Option<Principal> {
        let id = jar.get(SESSION_COOKIE)?.value().to_string();
        self.sessions.get(&id).await
    }

    /// Start a session and add its cookie to the jar.
    pub async fn establish(&self, jar: CookieJar, principal: Principal) -> CookieJar {
        let id = OAuthStore::generate_token();
        tracing::debug!(subject = %principal.subject, "Browser session established");
        self.sessions.insert(id.clone(), principal).await;
        jar.add(self.cookie(id))
    }

    /// Drop the session named by the request cookies and clear the cookie.
    pub async fn invalidate(&self, jar: CookieJar) -> CookieJar {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            self.sessions.invalidate(cookie.value()).await;
        }
        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }

    fn cookie(&self, id: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, id))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }
}

impl std::fmt::Debug for BrowserSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSessions")
            .field("sessions", &self.sessions.entry_count())
            .finish()
    }
}
