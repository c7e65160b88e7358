//! OAuth 2.0 authorization code machinery.
//!
//! Implements:
//! - Authorization request validation with exact redirect URI matching
//!   (port-insensitive for loopback hosts)
//! - PKCE (RFC 7636) with S256
//! - The deny-list login gate
//! - The per-request authorization state machine and single-use codes
//! - Token endpoint client authentication

pub mod client_auth;
pub mod coordinator;
pub mod deny;
pub mod flow;
pub mod pkce;
pub mod store;
pub mod types;
pub mod validator;

pub use client_auth::{ClientAuthenticator, ClientCredentials};
pub use coordinator::{AuthorizationSessionCoordinator, AuthorizeOutcome, ConsentView, RedeemedCode};
pub use deny::{DenyDecision, DenyListGate, LoginIdentity};
pub use flow::{AuthorizationState, TransitionError};
pub use store::OAuthStore;
pub use types::AuthorizationRequest;
pub use validator::{AuthorizationRequestValidator, Rejection};
