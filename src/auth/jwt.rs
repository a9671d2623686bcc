//! Bearer token issuance and verification (HS256 JWT)
//!
//! Tokens are stateless. Revocation happens by comparing `iat` against the
//! identity's `password_changed_at` in the access-control middleware.

use crate::{config::AppConfig, error::AppError};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (identity ID)
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// JWT ID
    pub jti: String,
}

/// Result of a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject_id: Uuid,
    pub issued_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("failed to encode token: {0}")]
    Encode(String),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid => {
                AppError::unauthenticated("Invalid token. Please log in again!")
            }
            TokenError::Expired => {
                AppError::unauthenticated("Your token has expired! Please log in again.")
            }
            TokenError::Encode(msg) => AppError::Internal(msg),
        }
    }
}

/// Signs and verifies bearer tokens
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expires_in_secs: u64,
}

impl TokenIssuer {
    /// Create issuer from config
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let secret = config.security.jwt_secret.expose_secret();

        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expires_in_secs: config.security.jwt_expires_in_secs,
        })
    }

    pub fn expires_in_secs(&self) -> u64 {
        self.expires_in_secs
    }

    /// Issue a token for the subject, valid from now
    pub fn issue(&self, subject_id: &Uuid) -> Result<String, TokenError> {
        self.issue_at(subject_id, Utc::now())
    }

    /// Issue a token with an explicit issue time
    pub fn issue_at(&self, subject_id: &Uuid, issued_at: DateTime<Utc>) -> Result<String, TokenError> {
        let expiration = issued_at + Duration::seconds(self.expires_in_secs as i64);

        let claims = Claims {
            sub: subject_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode token: {:?}", e);
            TokenError::Encode(e.to_string())
        })
    }

    /// Verify signature and expiry
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Invalid,
                }
            })?
            .claims;

        let subject_id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Invalid)?;

        Ok(VerifiedToken {
            subject_id,
            issued_at: claims.iat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::from_config(&crate::config::testing::config()).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = issuer();
        let id = Uuid::new_v4();

        let token = issuer.issue(&id).unwrap();
        let verified = issuer.verify(&token).unwrap();

        assert_eq!(verified.subject_id, id);
        assert!((Utc::now().timestamp() - verified.issued_at).abs() <= 1);
    }

    #[test]
    fn test_expired_token_is_distinguished() {
        let issuer = issuer();
        let long_ago = Utc::now() - Duration::seconds(issuer.expires_in_secs() as i64 + 5);

        let token = issuer.issue_at(&Uuid::new_v4(), long_ago).unwrap();
        assert!(matches!(issuer.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        assert!(matches!(issuer().verify("invalid_token"), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_tampered_signature_is_invalid() {
        let issuer = issuer();
        let victim = issuer.issue(&Uuid::new_v4()).unwrap();
        let attacker = issuer.issue(&Uuid::new_v4()).unwrap();

        // 换上别人的 payload，保留原签名
        let v: Vec<&str> = victim.split('.').collect();
        let a: Vec<&str> = attacker.split('.').collect();
        let token = format!("{}.{}.{}", v[0], a[1], v[2]);

        assert!(matches!(issuer.verify(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_token_from_other_secret_is_invalid() {
        let mut other = crate::config::testing::config();
        other.security.jwt_secret =
            secrecy::Secret::new("another_secret_key_32_characters_long".to_string());
        let foreign = TokenIssuer::from_config(&other).unwrap();

        let token = foreign.issue(&Uuid::new_v4()).unwrap();
        assert!(matches!(issuer().verify(&token), Err(TokenError::Invalid)));
    }
}
