//! Password reset tokens
//!
//! Lifecycle: `NONE -> ISSUED -> {CONSUMED | EXPIRED | ROLLED_BACK}`. Only the
//! SHA-256 digest of the secret is stored; the plaintext exists solely in the
//! outbound notification.

use crate::{
    auth::password::{PasswordChange, PasswordHasher},
    config::AppConfig,
    error::AppError,
    models::identity::Identity,
    notification::{Notification, NotificationGateway},
    repository::IdentityRepository,
    telemetry,
};
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Raw secret length before hex encoding
const RESET_TOKEN_BYTES: usize = 32;

pub const DELIVERY_FAILED_MESSAGE: &str = "There was an error sending the email. Try again later!";

pub struct ResetTokenManager {
    identities: Arc<dyn IdentityRepository>,
    hasher: PasswordHasher,
    ttl: Duration,
}

impl ResetTokenManager {
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        hasher: PasswordHasher,
        config: &AppConfig,
    ) -> Self {
        Self {
            identities,
            hasher,
            ttl: Duration::seconds(config.security.reset_token_ttl_secs as i64),
        }
    }

    /// SHA-256 hex digest used for storage and lookup
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_secret() -> String {
        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Persist a fresh digest + expiry and return the plaintext secret
    ///
    /// A second call for the same identity replaces the first token.
    pub async fn generate(&self, identity: &Identity) -> Result<String, AppError> {
        let token = Self::generate_secret();
        let expires_at = Utc::now() + self.ttl;

        self.identities
            .store_reset_token(identity.id, &Self::hash_token(&token), expires_at)
            .await?;

        tracing::info!(identity_id = %identity.id, %expires_at, "Password reset token issued");
        Ok(token)
    }

    /// Clear both reset fields after a failed delivery
    pub async fn rollback(&self, identity_id: Uuid) -> Result<(), AppError> {
        self.identities.clear_reset_token(identity_id).await?;
        tracing::warn!(identity_id = %identity_id, "Password reset token rolled back");
        Ok(())
    }

    /// Issue a token and hand it to the gateway; roll back if delivery fails
    pub async fn issue_and_deliver(
        &self,
        identity: &Identity,
        gateway: &dyn NotificationGateway,
        reset_url_base: &str,
    ) -> Result<(), AppError> {
        let token = self.generate(identity).await?;
        let notification = self.reset_notification(identity, reset_url_base, &token);

        if let Err(e) = gateway.deliver(&notification).await {
            tracing::warn!(identity_id = %identity.id, error = %e, "Reset notification delivery failed");
            telemetry::record_reset_request("delivery_failed");

            if let Err(rollback_err) = self.rollback(identity.id).await {
                tracing::error!(
                    identity_id = %identity.id,
                    error = ?rollback_err,
                    "Failed to roll back reset token after delivery failure"
                );
                return Err(rollback_err);
            }
            return Err(AppError::Delivery(DELIVERY_FAILED_MESSAGE.to_string()));
        }

        telemetry::record_reset_request("sent");
        Ok(())
    }

    fn reset_notification(&self, identity: &Identity, reset_url_base: &str, token: &str) -> Notification {
        let reset_url = format!("{}/{}", reset_url_base.trim_end_matches('/'), token);
        Notification {
            recipient: identity.email.clone(),
            subject: format!(
                "Your password reset token (valid for {} min)",
                self.ttl.num_minutes()
            ),
            body: format!(
                "Forgot your password? Submit a PATCH request with your new password and \
                 passwordConfirm to: {}.\nIf you didn't forget your password, please ignore this email!",
                reset_url
            ),
        }
    }

    /// Redeem a reset secret for a password change
    ///
    /// Unknown, expired, or already-used tokens fail with
    /// [`AppError::InvalidOrExpiredToken`] and leave every record untouched.
    pub async fn consume(&self, token: &str, new_password: &str) -> Result<Identity, AppError> {
        let token_hash = Self::hash_token(token);

        if self
            .identities
            .find_by_reset_token(&token_hash, Utc::now())
            .await?
            .is_none()
        {
            telemetry::record_auth_rejection("reset_token_invalid");
            return Err(AppError::InvalidOrExpiredToken);
        }

        self.hasher.validate_password_policy(new_password)?;
        let change = PasswordChange::new(&self.hasher, new_password).await?;

        // The lookup above is advisory; this conditional update is the one that counts.
        let identity = self
            .identities
            .consume_reset_token(&token_hash, Utc::now(), &change)
            .await?
            .ok_or(AppError::InvalidOrExpiredToken)?;

        tracing::info!(identity_id = %identity.id, "Password reset token consumed");
        Ok(identity)
    }
}
