//! Configuration for the authorization server.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default values for every tunable.
pub mod defaults {
    use std::time::Duration;

    /// Issuer used when none is configured.
    pub const ISSUER: &str = "http://localhost:9000";

    /// HTTP port.
    pub const PORT: u16 = 9000;

    /// Authorization code lifetime (5 minutes).
    pub const CODE_TTL: Duration = Duration::from_secs(300);

    /// Access / ID token lifetime (5 minutes).
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(300);

    /// Refresh token lifetime (1 hour).
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Signing key set cache TTL (5 minutes).
    pub const KEY_CACHE_TTL: Duration = Duration::from_secs(300);

    /// Remote key set fetch timeout.
    pub const KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

    /// Bound on every collaborator store call.
    pub const STORE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Lifetime of an in-flight authorization request (login + consent).
    pub const FLOW_TTL: Duration = Duration::from_secs(600);

    /// Browser session idle timeout (30 minutes).
    pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

    /// Maximum number of concurrent browser sessions kept in memory.
    pub const SESSION_MAX_CAPACITY: u64 = 10_000;

    /// Background cleanup interval for codes, flows and revoked jtis.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

    /// Scopes granted to every end-user access token.
    pub const SELF_SERVICE_SCOPES: &[&str] = &["profile:read", "profile:write"];

    /// Role that earns the administrative scope.
    pub const ADMIN_ROLE: &str = "ROLE_ADMIN";

    /// Scope granted to administrators.
    pub const ADMIN_SCOPE: &str = "profile:admin";

    /// Max-age advertised on the public JWKS endpoint.
    pub const JWKS_MAX_AGE: Duration = Duration::from_secs(300);
}

/// Backend for the client, deny-rule and user stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// Seeded once from the bootstrap file, lost on restart.
    #[default]
    Memory,
    /// A JSON document on disk, rewritten on every change.
    File,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(ConfigError::invalid(
                "AUTHZ_STORE_BACKEND",
                format!("expected 'memory' or 'file', got '{other}'"),
            )),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Issuer identifier; also the public base URL of every endpoint.
    pub issuer: String,

    /// HTTP port.
    pub port: u16,

    /// Store backend.
    pub store_backend: StoreBackend,

    /// Bootstrap (memory) or state (file) document.
    pub state_file: Option<PathBuf>,

    /// Remote JWK set URL.
    pub keyset_url: Option<String>,

    /// Bearer token sent to the remote JWK set URL.
    pub keyset_token: Option<String>,

    /// Static JWK set: inline JSON or a path to a JSON file.
    pub static_jwks: Option<String>,

    /// Signing key set cache TTL.
    pub key_cache_ttl: Duration,

    /// Remote key set fetch timeout.
    pub key_fetch_timeout: Duration,

    /// Collaborator store call timeout.
    pub store_timeout: Duration,

    /// Authorization flow lifetime.
    pub flow_ttl: Duration,

    /// Browser session idle timeout.
    pub session_idle_ttl: Duration,

    /// Accept `code_challenge_method=plain`.
    pub allow_plain_pkce: bool,

    /// Scopes added to every end-user access token.
    pub self_service_scopes: Vec<String>,

    /// Role that earns `admin_scope`.
    pub admin_role: String,

    /// Scope added for `admin_role`.
    pub admin_scope: String,
}

impl Config {
    /// Create a configuration with defaults for the given issuer.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            port: defaults::PORT,
            store_backend: StoreBackend::Memory,
            state_file: None,
            keyset_url: None,
            keyset_token: None,
            static_jwks: None,
            key_cache_ttl: defaults::KEY_CACHE_TTL,
            key_fetch_timeout: defaults::KEY_FETCH_TIMEOUT,
            store_timeout: defaults::STORE_TIMEOUT,
            flow_ttl: defaults::FLOW_TTL,
            session_idle_ttl: defaults::SESSION_IDLE_TTL,
            allow_plain_pkce: false,
            self_service_scopes: defaults::SELF_SERVICE_SCOPES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            admin_role: defaults::ADMIN_ROLE.to_string(),
            admin_scope: defaults::ADMIN_SCOPE.to_string(),
        }
    }

    /// Create a test configuration with short timeouts.
    #[must_use]
    pub fn for_testing(issuer: &str) -> Self {
        Self {
            key_fetch_timeout: Duration::from_millis(500),
            store_timeout: Duration::from_millis(500),
            ..Self::new(issuer)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let issuer = env_opt("AUTHZ_ISSUER").unwrap_or_else(|| defaults::ISSUER.to_string());
        let mut config = Self::new(issuer);

        if let Some(port) = env_opt("PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::invalid("PORT", format!("not a port number: {port}")))?;
        }
        if let Some(backend) = env_opt("AUTHZ_STORE_BACKEND") {
            config.store_backend = backend.parse()?;
        }
        config.state_file = env_opt("AUTHZ_STATE_FILE").map(PathBuf::from);
        config.keyset_url = env_opt("AUTHZ_KEYSET_URL");
        config.keyset_token = env_opt("AUTHZ_KEYSET_TOKEN");
        config.static_jwks = env_opt("AUTHZ_STATIC_JWKS");

        config.key_cache_ttl = env_secs("AUTHZ_KEY_CACHE_TTL_SECS", config.key_cache_ttl)?;
        config.key_fetch_timeout =
            env_secs("AUTHZ_KEY_FETCH_TIMEOUT_SECS", config.key_fetch_timeout)?;
        config.store_timeout = env_secs("AUTHZ_STORE_TIMEOUT_SECS", config.store_timeout)?;
        config.flow_ttl = env_secs("AUTHZ_FLOW_TTL_SECS", config.flow_ttl)?;
        config.session_idle_ttl = env_secs("AUTHZ_SESSION_IDLE_SECS", config.session_idle_ttl)?;

        if let Some(flag) = env_opt("AUTHZ_ALLOW_PLAIN_PKCE") {
            config.allow_plain_pkce = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(scopes) = env_opt("AUTHZ_SELF_SERVICE_SCOPES") {
            config.self_service_scopes = scopes.split_whitespace().map(str::to_string).collect();
        }
        if let Some(role) = env_opt("AUTHZ_ADMIN_ROLE") {
            config.admin_role = role;
        }
        if let Some(scope) = env_opt("AUTHZ_ADMIN_SCOPE") {
            config.admin_scope = scope;
        }

        Ok(config)
    }

    /// Check if any signing key source is configured.
    #[must_use]
    pub const fn has_key_source(&self) -> bool {
        self.keyset_url.is_some() || self.static_jwks.is_some()
    }

    /// Absolute URL of an endpoint path under the issuer.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer, path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(defaults::ISSUER)
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env_opt(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::invalid(name, format!("expected seconds, got '{raw}'"))),
        None => Ok(default),
    }
}
