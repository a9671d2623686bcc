//! In-memory identity store
//!
//! Backs `storage = "memory"` and the test suites. Every operation holds the
//! map lock for its whole read-modify-write, so conditional updates are atomic.

use super::identity_repo::IdentityRepository;
use crate::{auth::password::PasswordChange, error::AppError, models::identity::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryIdentityRepository {
    identities: RwLock<HashMap<Uuid, Identity>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record access, including inactive identities
    pub async fn snapshot(&self, id: Uuid) -> Option<Identity> {
        self.identities.read().await.get(&id).cloned()
    }

    /// Overwrite a stored record as-is
    pub async fn put(&self, identity: Identity) {
        self.identities.write().await.insert(identity.id, identity);
    }
}

fn stamp(current: Option<DateTime<Utc>>, next: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(current.map_or(next, |c| c.max(next)))
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn create(&self, new: NewIdentity) -> Result<Identity, AppError> {
        let mut identities = self.identities.write().await;

        if identities.values().any(|i| i.email == new.email) {
            return Err(AppError::validation("Email already in use"));
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            role: new.role,
            password_hash: new.password_hash,
            password_changed_at: None,
            password_reset_hash: None,
            password_reset_expires_at: None,
            active: true,
            created_at: Utc::now(),
        };
        identities.insert(identity.id, identity.clone());

        Ok(identity)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, AppError> {
        Ok(self
            .identities
            .read()
            .await
            .get(&id)
            .filter(|i| i.active)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AppError> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|i| i.active && i.email == email)
            .cloned())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Option<Identity>, AppError> {
        let mut identities = self.identities.write().await;

        if let Some(email) = &update.email {
            if identities.values().any(|i| i.id != id && &i.email == email) {
                return Err(AppError::validation("Email already in use"));
            }
        }

        let Some(identity) = identities.get_mut(&id).filter(|i| i.active) else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            identity.name = name.clone();
        }
        if let Some(email) = &update.email {
            identity.email = email.clone();
        }

        Ok(Some(identity.clone()))
    }

    async fn update_password(&self, id: Uuid, change: &PasswordChange) -> Result<Option<Identity>, AppError> {
        let mut identities = self.identities.write().await;

        let Some(identity) = identities.get_mut(&id).filter(|i| i.active) else {
            return Ok(None);
        };
        identity.password_hash = change.password_hash.clone();
        identity.password_changed_at = stamp(identity.password_changed_at, change.changed_at);

        Ok(Some(identity.clone()))
    }

    async fn store_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(identity) = self.identities.write().await.get_mut(&id) {
            identity.password_reset_hash = Some(token_hash.to_string());
            identity.password_reset_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(identity) = self.identities.write().await.get_mut(&id) {
            identity.password_reset_hash = None;
            identity.password_reset_expires_at = None;
        }
        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, AppError> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|i| reset_matches(i, token_hash, now))
            .cloned())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        change: &PasswordChange,
    ) -> Result<Option<Identity>, AppError> {
        let mut identities = self.identities.write().await;

        let Some(identity) = identities
            .values_mut()
            .find(|i| reset_matches(i, token_hash, now))
        else {
            return Ok(None);
        };

        identity.password_hash = change.password_hash.clone();
        identity.password_changed_at = stamp(identity.password_changed_at, change.changed_at);
        identity.password_reset_hash = None;
        identity.password_reset_expires_at = None;

        Ok(Some(identity.clone()))
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError> {
        match self.identities.write().await.get_mut(&id) {
            Some(identity) if identity.active => {
                identity.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Identity>, AppError> {
        let mut identities: Vec<Identity> = self
            .identities
            .read()
            .await
            .values()
            .filter(|i| i.active)
            .cloned()
            .collect();
        identities.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(identities
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.identities.write().await.remove(&id).is_some())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

fn reset_matches(identity: &Identity, token_hash: &str, now: DateTime<Utc>) -> bool {
    identity.active
        && identity.password_reset_hash.as_deref() == Some(token_hash)
        && identity
            .password_reset_expires_at
            .is_some_and(|expires_at| expires_at > now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            name: "Ada".to_string(),
            email: email.to_string(),
            role: Role::User,
            password_hash: "hash-v1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_email() {
        let repo = InMemoryIdentityRepository::new();
        repo.create(new_identity("a@x.com")).await.unwrap();

        let err = repo.create(new_identity("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_creation_does_not_stamp_password_changed_at() {
        let repo = InMemoryIdentityRepository::new();
        let identity = repo.create(new_identity("a@x.com")).await.unwrap();
        assert!(identity.password_changed_at.is_none());
    }

    #[tokio::test]
    async fn test_profile_update_leaves_credentials_alone() {
        let repo = InMemoryIdentityRepository::new();
        let identity = repo.create(new_identity("a@x.com")).await.unwrap();

        let updated = repo
            .update_profile(
                identity.id,
                &ProfileUpdate {
                    name: Some("Grace".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.name, "Grace");
        assert_eq!(updated.password_hash, "hash-v1");
        assert!(updated.password_changed_at.is_none());
    }

    #[tokio::test]
    async fn test_password_changed_at_never_moves_backwards() {
        let repo = InMemoryIdentityRepository::new();
        let identity = repo.create(new_identity("a@x.com")).await.unwrap();
        let now = Utc::now();

        repo.update_password(identity.id, &PasswordChange::from_hash("h2".into(), now))
            .await
            .unwrap();
        let stale = PasswordChange::from_hash("h3".into(), now - Duration::minutes(5));
        let updated = repo.update_password(identity.id, &stale).await.unwrap().unwrap();

        assert_eq!(updated.password_hash, "h3");
        assert_eq!(updated.password_changed_at, Some(now - Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_reset_token_consumed_once() {
        let repo = InMemoryIdentityRepository::new();
        let identity = repo.create(new_identity("a@x.com")).await.unwrap();
        let now = Utc::now();
        repo.store_reset_token(identity.id, "digest", now + Duration::minutes(10))
            .await
            .unwrap();

        let change = PasswordChange::from_hash("h2".into(), now);
        let first = repo.consume_reset_token("digest", now, &change).await.unwrap();
        let second = repo.consume_reset_token("digest", now, &change).await.unwrap();

        let consumed = first.unwrap();
        assert!(consumed.password_reset_hash.is_none());
        assert!(consumed.password_reset_expires_at.is_none());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_expired_reset_token_does_not_match() {
        let repo = InMemoryIdentityRepository::new();
        let identity = repo.create(new_identity("a@x.com")).await.unwrap();
        let now = Utc::now();
        repo.store_reset_token(identity.id, "digest", now - Duration::seconds(1))
            .await
            .unwrap();

        assert!(repo.find_by_reset_token("digest", now).await.unwrap().is_none());
        let change = PasswordChange::from_hash("h2".into(), now);
        assert!(repo.consume_reset_token("digest", now, &change).await.unwrap().is_none());
        assert_eq!(repo.snapshot(identity.id).await.unwrap().password_hash, "hash-v1");
    }

    #[tokio::test]
    async fn test_deactivated_identity_is_invisible() {
        let repo = InMemoryIdentityRepository::new();
        let identity = repo.create(new_identity("a@x.com")).await.unwrap();

        assert!(repo.deactivate(identity.id).await.unwrap());
        assert!(repo.find_by_id(identity.id).await.unwrap().is_none());
        assert!(repo.find_by_email("a@x.com").await.unwrap().is_none());
        assert!(!repo.deactivate(identity.id).await.unwrap());
    }
}
