//! OAuth 2.0 / OpenID Connect Authorization Server
//!
//! Issues authorization codes to browser clients and exchanges them for
//! signed JWT access, refresh and ID tokens.
//!
//! # Features
//!
//! - **Authorization code + PKCE**: exact redirect URI matching, loopback
//!   port relaxation, single-use codes with replay revocation
//! - **Deny-list login policy**: exact and regex rules per identity provider
//! - **Token endpoint**: `authorization_code`, `refresh_token` (with rotation)
//!   and `client_credentials`; introspection and revocation
//! - **Rotating signing keys**: remote JWK set with TTL cache and static
//!   fallback; public JWKS and OIDC discovery
//!
//! # Example
//!
//! ```no_run
//! use authz_server::{config::Config, server::AuthorizationServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = AuthorizationServer::from_config(config).await?;
//!     server.run_http().await
//! }
//! ```

pub mod audit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod models;
pub mod oauth;
pub mod server;
pub mod store;
pub mod token;

pub use config::Config;
pub use error::{ConfigError, KeyError, OAuthError, StoreError};
pub use server::AuthorizationServer;
