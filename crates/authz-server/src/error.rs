//! Error types for the authorization server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Protocol errors render as RFC 6749 §5.2 error bodies; collaborator and key errors
//! never leak their details to callers.

use std::fmt;
use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// OAuth 2.0 / OIDC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidScope,
    UnsupportedResponseType,
    UnauthorizedClient,
    AccessDenied,
    InvalidGrant,
    InvalidClient,
    UnsupportedGrantType,
    InvalidToken,
    InsufficientScope,
    ServerError,
    TemporarilyUnavailable,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidScope => "invalid_scope",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidClient => "invalid_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    /// HTTP status used when the error is returned as a body.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope => StatusCode::FORBIDDEN,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol-level error returned to OAuth clients.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {description}")]
pub struct OAuthError {
    pub code: ErrorCode,
    pub description: String,
}

impl OAuthError {
    #[must_use]
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self { code, description: description.into() }
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, description)
    }

    #[must_use]
    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidScope, description)
    }

    /// Generic `invalid_grant`. The description is fixed so that callers cannot
    /// distinguish unknown, expired, replayed and mismatched grants.
    #[must_use]
    pub fn invalid_grant() -> Self {
        Self::new(ErrorCode::InvalidGrant, "The provided authorization grant is invalid")
    }

    #[must_use]
    pub fn invalid_client() -> Self {
        Self::new(ErrorCode::InvalidClient, "Client authentication failed")
    }

    #[must_use]
    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnauthorizedClient, description)
    }

    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self::new(ErrorCode::UnsupportedGrantType, "Unsupported grant_type")
    }

    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new(ErrorCode::InvalidToken, "The access token is invalid")
    }

    #[must_use]
    pub fn server_error() -> Self {
        Self::new(ErrorCode::ServerError, "The server could not complete the request")
    }

    #[must_use]
    pub fn temporarily_unavailable() -> Self {
        Self::new(ErrorCode::TemporarilyUnavailable, "The server is temporarily unavailable")
    }

    /// JSON body per RFC 6749 §5.2.
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code.as_str(),
            "error_description": self.description,
        })
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let mut response = (status, Json(self.to_body())).into_response();

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        match self.code {
            ErrorCode::InvalidClient => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"oauth2\""),
                );
            }
            ErrorCode::InvalidToken => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            ErrorCode::InsufficientScope => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"insufficient_scope\", scope=\"openid\""),
                );
            }
            _ => {}
        }
        response
    }
}

/// Errors from collaborator stores (clients, deny rules, users).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The call did not complete within the configured bound.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The record violates a model invariant.
    #[error("Invalid record: {0}")]
    Invalid(String),

    /// File backend I/O failure.
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File backend (de)serialization failure.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Store failures degrade to rejecting the specific request.
impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        tracing::warn!(error = %err, "Store failure while serving request");
        Self::temporarily_unavailable()
    }
}

/// Errors from signing-key handling.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    /// No key set could be produced from any source.
    #[error("No signing keys available: {0}")]
    Unavailable(String),

    /// Remote fetch failed.
    #[error("Key set fetch failed: {0}")]
    Fetch(String),

    /// Remote fetch exceeded its timeout.
    #[error("Key set fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Key material could not be parsed or is unsupported.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// JWT encoding or decoding failed.
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl KeyError {
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }
}

impl From<KeyError> for OAuthError {
    fn from(err: KeyError) -> Self {
        tracing::error!(error = %err, "Signing key failure while serving request");
        Self::server_error()
    }
}

/// Fatal start-up errors. The process must not serve traffic after one of these.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Neither a remote nor a static key source is configured.
    #[error(
        "No signing key source configured: set AUTHZ_KEYSET_URL or AUTHZ_STATIC_JWKS (see `authz-server generate-key`)"
    )]
    NoKeySource,

    /// Static key material is malformed.
    #[error("Malformed signing key configuration: {0}")]
    MalformedKeys(#[source] KeyError),

    /// A configuration value is invalid.
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid {
        field: String,
        message: String,
    },

    /// Bootstrap data could not be loaded.
    #[error("Failed to load bootstrap data: {0}")]
    Bootstrap(#[from] StoreError),
}

impl ConfigError {
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }
}

/// Result type alias for protocol operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
