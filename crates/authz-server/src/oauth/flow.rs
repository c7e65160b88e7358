//! Authorization session state machine.
//!
//! ```text
//! Unauthenticated -> Authenticated -> [ConsentPending] -> ConsentGranted -> CodeIssued
//!                                                                         -> Redeemed | Expired | Revoked
//! any state before CodeIssued -> Abandoned | Expired
//! Redeemed -> Revoked (code replay only)
//! ```

use crate::models::{Principal, ScopeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationState {
    Unauthenticated,
    Authenticated { principal: Box<Principal> },
    ConsentPending { principal: Box<Principal> },
    ConsentGranted { principal: Box<Principal>, scopes: ScopeSet },
    CodeIssued,
    Redeemed,
    Expired,
    Abandoned,
    Revoked,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid authorization state transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

impl AuthorizationState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Authenticated { .. } => "AUTHENTICATED",
            Self::ConsentPending { .. } => "CONSENT_PENDING",
            Self::ConsentGranted { .. } => "CONSENT_GRANTED",
            Self::CodeIssued => "CODE_ISSUED",
            Self::Redeemed => "REDEEMED",
            Self::Expired => "EXPIRED",
            Self::Abandoned => "ABANDONED",
            Self::Revoked => "REVOKED",
        }
    }

    /// Terminal states accept no further progress. `Redeemed` still admits
    /// `revoke` so a replayed code can take its tokens down with it.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Redeemed | Self::Expired | Self::Abandoned | Self::Revoked)
    }

    /// The authenticated principal, while the flow still carries one.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated { principal }
            | Self::ConsentPending { principal }
            | Self::ConsentGranted { principal, .. } => Some(&**principal),
            _ => None,
        }
    }

    fn reject(&self, to: &'static str) -> TransitionError {
        TransitionError { from: self.name(), to }
    }

    pub fn authenticate(self, principal: Principal) -> Result<Self, TransitionError> {
        match self {
            Self::Unauthenticated => Ok(Self::Authenticated { principal: Box::new(principal) }),
            other => Err(other.reject("AUTHENTICATED")),
        }
    }

    pub fn require_consent(self) -> Result<Self, TransitionError> {
        match self {
            Self::Authenticated { principal } => Ok(Self::ConsentPending { principal }),
            other => Err(other.reject("CONSENT_PENDING")),
        }
    }

    /// Consent may be granted interactively or implied (not required, or
    /// already remembered), so both pre-consent states are accepted.
    pub fn grant_consent(self, scopes: ScopeSet) -> Result<Self, TransitionError> {
        match self {
            Self::Authenticated { principal } | Self::ConsentPending { principal } => {
                Ok(Self::ConsentGranted { principal, scopes })
            }
            other => Err(other.reject("CONSENT_GRANTED")),
        }
    }

    pub fn issue_code(self) -> Result<Self, TransitionError> {
        match self {
            Self::ConsentGranted { .. } => Ok(Self::CodeIssued),
            other => Err(other.reject("CODE_ISSUED")),
        }
    }

    pub fn redeem(self) -> Result<Self, TransitionError> {
        match self {
            Self::CodeIssued => Ok(Self::Redeemed),
            other => Err(other.reject("REDEEMED")),
        }
    }

    pub fn expire(self) -> Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(self.reject("EXPIRED"));
        }
        Ok(Self::Expired)
    }

    pub fn abandon(self) -> Result<Self, TransitionError> {
        match self {
            Self::Unauthenticated
            | Self::Authenticated { .. }
            | Self::ConsentPending { .. }
            | Self::ConsentGranted { .. } => Ok(Self::Abandoned),
            other => Err(other.reject("ABANDONED")),
        }
    }

    pub fn revoke(self) -> Result<Self, TransitionError> {
        match self {
            Self::CodeIssued | Self::Redeemed => Ok(Self::Revoked),
            other => Err(other.reject("REVOKED")),
        }
    }
}
