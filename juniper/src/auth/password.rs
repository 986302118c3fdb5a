use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Hash a secret with Argon2id and a random salt, returning a PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// `true` when `password` matches the PHC string. A malformed hash never matches.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = match PasswordHash::new(password_hash) {
        Ok(parsed) => parsed,
        Err(err) => {
            if !password_hash.is_empty() {
                warn!(error = %err, "stored password hash is malformed");
            }
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::{hash_password, verify_password};

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let first = hash_password("password").unwrap();
        let second = hash_password("password").unwrap();

        assert!(!first.is_empty());
        assert_ne!(first, second);
        assert!(verify_password("password", &first));
        assert!(verify_password("password", &second));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let hash = hash_password("password").unwrap();
        assert!(!verify_password("Password", &hash));
        assert!(!verify_password("", &hash));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("password", ""));
        assert!(!verify_password("password", "password"));
    }
}
