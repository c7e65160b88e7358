//! Argon2 hashing for client secrets and user passwords.

use std::sync::OnceLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hash a secret into a PHC string using Argon2id with default parameters.
///
/// # Errors
///
/// Returns `argon2::password_hash::Error` if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a secret against a stored PHC string. Malformed hashes never verify.
#[must_use]
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored credential hash is not a valid PHC string");
        return false;
    };
    Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
}

/// [`verify_secret`] on the blocking pool so hashing never stalls a runtime
/// worker. A panicked or cancelled task counts as a failed verification.
pub async fn verify_secret_async(secret: &str, hash: &str) -> bool {
    let (secret, hash) = (secret.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || verify_secret(&secret, &hash))
        .await
        .unwrap_or(false)
}

/// Spend the same work as a real verification against a throwaway hash.
/// Lookups that find no account call this so their latency matches a wrong
/// password.
pub async fn burn_verification(secret: &str) {
    let secret = secret.to_owned();
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(hash) = dummy_hash() {
            let _ = verify_secret(&secret, hash);
        }
    })
    .await;
}

fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY.get_or_init(|| hash_secret("no-such-account").ok()).as_deref()
}
