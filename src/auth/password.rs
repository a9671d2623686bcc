//! Password hashing and verification using Argon2id

use crate::{config::AppConfig, error::AppError};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use chrono::{DateTime, Duration, Utc};

/// Password hasher with a fixed work factor taken from configuration
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    min_length: usize,
}

impl PasswordHasher {
    /// Create hasher from the security section of the config
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let security = &config.security;
        let params = Params::new(
            security.hash_memory_kib,
            security.hash_iterations,
            security.hash_parallelism,
            None,
        )
        .map_err(|e| AppError::Config(format!("Invalid Argon2 params: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            min_length: security.password_min_length,
        })
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!("Failed to hash password: {:?}", e);
                AppError::Internal(format!("Failed to hash password: {}", e))
            })?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against a stored hash in constant time
    ///
    /// Returns `Ok(false)` on mismatch; errors only when the stored hash is unreadable.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            tracing::error!("Failed to parse password hash: {:?}", e);
            AppError::Internal(format!("Failed to parse password hash: {}", e))
        })?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::Internal(format!("Failed to verify password: {}", e))),
        }
    }

    /// Hash on the blocking pool so the request task is not stalled
    pub async fn hash_async(&self, password: String) -> Result<String, AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    /// Verify on the blocking pool
    pub async fn verify_async(&self, password: String, hash: String) -> Result<bool, AppError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
    }

    /// Validate password against policy
    pub fn validate_password_policy(&self, password: &str) -> Result<(), AppError> {
        if password.chars().count() < self.min_length {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }

        Ok(())
    }
}

/// A pending password mutation: the new hash plus the revocation stamp
///
/// The only way to produce a value accepted by
/// [`IdentityRepository::update_password`](crate::repository::IdentityRepository::update_password),
/// so every stored password change is hashed exactly once and re-stamps
/// `password_changed_at`.
#[derive(Debug, Clone)]
pub struct PasswordChange {
    pub password_hash: String,
    pub changed_at: DateTime<Utc>,
}

impl PasswordChange {
    /// Stamp is backdated by one second so the token issued alongside the
    /// change (same second) is not immediately treated as stale.
    pub const STAMP_BACKDATE_SECS: i64 = 1;

    pub async fn new(hasher: &PasswordHasher, plaintext: &str) -> Result<Self, AppError> {
        let password_hash = hasher.hash_async(plaintext.to_string()).await?;
        Ok(Self::from_hash(password_hash, Utc::now()))
    }

    pub fn from_hash(password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            password_hash,
            changed_at: now - Duration::seconds(Self::STAMP_BACKDATE_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::from_config(&crate::config::testing::config()).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("TestPassword123!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("TestPassword123!", &hash).unwrap());
    }

    #[test]
    fn test_verify_fails_with_wrong_password() {
        let hasher = hasher();
        let hash = hasher.hash("TestPassword123!").unwrap();
        assert!(!hasher.verify("WrongPassword", &hash).unwrap());
    }

    #[test]
    fn test_hash_is_different_each_time() {
        let hasher = hasher();
        let hash1 = hasher.hash("TestPassword123!").unwrap();
        let hash2 = hasher.hash("TestPassword123!").unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.verify("TestPassword123!", &hash1).unwrap());
        assert!(hasher.verify("TestPassword123!", &hash2).unwrap());
    }

    #[test]
    fn test_verify_garbage_hash_is_error() {
        assert!(hasher().verify("whatever", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_password_policy_validation() {
        let hasher = hasher();
        assert!(hasher.validate_password_policy("secret123").is_ok());
        assert!(hasher.validate_password_policy("short").is_err());
    }

    #[test]
    fn test_password_change_is_backdated() {
        let now = Utc::now();
        let change = PasswordChange::from_hash("h".to_string(), now);
        assert_eq!((now - change.changed_at).num_seconds(), 1);
    }
}
