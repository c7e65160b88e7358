//! Token issuance, introspection and revocation.

pub mod claims;
mod introspection;
mod revocation;
mod service;

pub use claims::{
    AccessTokenClaims, Claims, ClaimsContext, ClaimsCustomizer, NoopCustomizer, SelfServiceScopesCustomizer,
    TokenKind,
};
pub use introspection::{IntrospectionResponse, TokenHintRequest};
pub use service::{TokenRequest, TokenResponse, TokenService};
