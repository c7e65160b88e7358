//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements S256 (and optionally plain) code challenge verification per
//! RFC 7636. Comparisons run in constant time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Code challenge transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl CodeChallengeMethod {
    #[must_use]
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "S256" => Some(Self::S256),
            "plain" => Some(Self::Plain),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

/// Check the RFC 7636 §4.1 shape: 43–128 unreserved characters. Applies to
/// both verifiers and challenges.
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    (43..=128).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Compute `BASE64URL(SHA256(code_verifier))`.
#[must_use]
pub fn s256_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Verify a PKCE S256 code challenge.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let computed = s256_challenge(code_verifier);
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}

/// Verify a verifier against a stored challenge with the given method.
#[must_use]
pub fn verify(method: CodeChallengeMethod, code_verifier: &str, code_challenge: &str) -> bool {
    if !is_well_formed(code_verifier) {
        return false;
    }
    match method {
        CodeChallengeMethod::S256 => verify_s256(code_verifier, code_challenge),
        CodeChallengeMethod::Plain => code_verifier.as_bytes().ct_eq(code_challenge.as_bytes()).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B test vector
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_valid() {
        assert!(verify_s256(VERIFIER, CHALLENGE));
        assert!(verify(CodeChallengeMethod::S256, VERIFIER, CHALLENGE));
    }

    #[test]
    fn test_s256_invalid_verifier() {
        assert!(!verify_s256("wrong-verifier", CHALLENGE));
    }

    #[test]
    fn test_s256_invalid_challenge() {
        assert!(!verify_s256(VERIFIER, "wrong-challenge"));
    }

    #[test]
    fn test_plain() {
        assert!(verify(CodeChallengeMethod::Plain, VERIFIER, VERIFIER));
        assert!(!verify(CodeChallengeMethod::Plain, VERIFIER, CHALLENGE));
    }

    #[test]
    fn test_short_verifier_rejected() {
        let short = "abc";
        assert!(!verify(CodeChallengeMethod::Plain, short, short));
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed(VERIFIER));
        assert!(!is_well_formed(&"a".repeat(129)));
        assert!(!is_well_formed(&format!("{}!", "a".repeat(50))));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(CodeChallengeMethod::from_param("S256"), Some(CodeChallengeMethod::S256));
        assert_eq!(CodeChallengeMethod::from_param("s256"), None);
    }
}
