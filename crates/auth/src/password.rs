//! Password hashing.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
};
use entities::User;
use rand::RngCore;

use crate::{AuthError, AuthResult};

/// Hashes and verifies passwords.
///
/// Implementations must produce self-describing hashes so that `verify` can
/// check passwords hashed with different parameters.
pub trait PasswordHasher: Send + Sync {
    /// Hashes a plaintext password.
    fn hash(&self, password: &str) -> AuthResult<String>;

    /// Returns true if `password` matches `hash`.
    fn verify(&self, password: &str, hash: &str) -> AuthResult<bool>;
}

/// Argon2id password hasher.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Creates a hasher with the library default (OWASP recommended) cost.
    pub fn new() -> Self {
        Self {
            params: Params::default(),
        }
    }

    /// Creates a hasher with a custom memory cost (KiB) and iteration count.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> AuthResult<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> AuthResult<String> {
        let mut salt_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut salt_bytes);

        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hashing(e.to_string()))?;

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| AuthError::MalformedHash(e.to_string()))?;

        Ok(self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

/// Checks a login attempt against the user found for the submitted email.
///
/// Unknown users and wrong passwords produce the same error.
pub fn check_credentials(
    hasher: &dyn PasswordHasher,
    user: Option<&User>,
    password: &str,
) -> AuthResult<()> {
    let user = user.ok_or(AuthError::InvalidCredentials)?;

    if user.password_hash.is_empty() || !hasher.verify(password, &user.password_hash)? {
        return Err(AuthError::InvalidCredentials);
    }

    if !user.is_active {
        tracing::debug!(user_id = %user.id, "Rejected login for inactive user");
        return Err(AuthError::InactiveUser);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn hasher() -> Argon2Hasher {
        Argon2Hasher::with_cost(64, 1).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("correct horse battery").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse battery", &hash).unwrap());
        assert!(!hasher.verify("wrong password", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let hasher = hasher();
        let first = hasher.hash("same-password").unwrap();
        let second = hasher.hash("same-password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_verify_uses_parameters_from_hash() {
        let cheap = hasher();
        let hash = cheap.hash("portable-secret").unwrap();
        let other = Argon2Hasher::with_cost(128, 2).unwrap();
        assert!(other.verify("portable-secret", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash() {
        let result = hasher().verify("pw", "not-a-phc-string");
        assert!(matches!(result, Err(AuthError::MalformedHash(_))));
    }

    #[test]
    fn test_check_credentials() {
        let hasher = hasher();
        let mut user = User::new("jane@example.com", hasher.hash("s3cure-pass").unwrap(), Utc::now());

        assert!(check_credentials(&hasher, Some(&user), "s3cure-pass").is_ok());
        assert!(matches!(
            check_credentials(&hasher, Some(&user), "nope"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            check_credentials(&hasher, None, "s3cure-pass"),
            Err(AuthError::InvalidCredentials)
        ));

        user.is_active = false;
        assert!(matches!(
            check_credentials(&hasher, Some(&user), "s3cure-pass"),
            Err(AuthError::InactiveUser)
        ));
    }
}
