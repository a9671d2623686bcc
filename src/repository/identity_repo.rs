//! Identity repository (数据库访问层)

use crate::{
    auth::password::PasswordChange,
    error::AppError,
    models::identity::*,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Persistence contract for identities
///
/// Shared as `Arc<dyn IdentityRepository>` across handlers. Lookups by id,
/// email and reset hash only ever return active identities.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn create(&self, new: NewIdentity) -> Result<Identity, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AppError>;

    /// Name/email only; never touches credentials.
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Option<Identity>, AppError>;

    /// The single write path for `password_hash` and `password_changed_at`.
    async fn update_password(&self, id: Uuid, change: &PasswordChange) -> Result<Option<Identity>, AppError>;

    async fn store_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Clears both reset fields together.
    async fn clear_reset_token(&self, id: Uuid) -> Result<(), AppError>;

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, AppError>;

    /// Conditionally applies `change` and clears the reset fields in one step.
    ///
    /// Returns `None` when no active identity holds an unexpired reset token
    /// with this hash, in which case nothing is written.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        change: &PasswordChange,
    ) -> Result<Option<Identity>, AppError>;

    /// Soft delete.
    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Identity>, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

const UNIQUE_VIOLATION: &str = "23505";

fn map_unique_violation(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return AppError::validation("Email already in use");
        }
    }
    AppError::Database(e)
}

pub struct PgIdentityRepository {
    db: PgPool,
}

impl PgIdentityRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityRepository for PgIdentityRepository {
    async fn create(&self, new: NewIdentity) -> Result<Identity, AppError> {
        sqlx::query_as::<_, Identity>(
            r#"
            INSERT INTO identities (name, email, role, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&new.name)
        .bind(&new.email)
        .bind(new.role.as_str())
        .bind(&new.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE id = $1 AND active",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(identity)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE email = $1 AND active",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        Ok(identity)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Option<Identity>, AppError> {
        sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities
            SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                updated_at = NOW()
            WHERE id = $1 AND active
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.email)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique_violation)
    }

    async fn update_password(&self, id: Uuid, change: &PasswordChange) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities
            SET
                password_hash = $2,
                password_changed_at = GREATEST(COALESCE(password_changed_at, $3), $3),
                updated_at = NOW()
            WHERE id = $1 AND active
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&change.password_hash)
        .bind(change.changed_at)
        .fetch_optional(&self.db)
        .await?;

        Ok(identity)
    }

    async fn store_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE identities
            SET
                password_reset_hash = $2,
                password_reset_expires_at = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE identities
            SET
                password_reset_hash = NULL,
                password_reset_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT * FROM identities
            WHERE password_reset_hash = $1
              AND password_reset_expires_at > $2
              AND active
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(identity)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
        change: &PasswordChange,
    ) -> Result<Option<Identity>, AppError> {
        // 单条条件更新：并发消费同一令牌时只有一个请求能命中
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities
            SET
                password_hash = $3,
                password_changed_at = GREATEST(COALESCE(password_changed_at, $4), $4),
                password_reset_hash = NULL,
                password_reset_expires_at = NULL,
                updated_at = NOW()
            WHERE password_reset_hash = $1
              AND password_reset_expires_at > $2
              AND active
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .bind(&change.password_hash)
        .bind(change.changed_at)
        .fetch_optional(&self.db)
        .await?;

        Ok(identity)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE identities SET active = FALSE, updated_at = NOW() WHERE id = $1 AND active",
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Identity>, AppError> {
        let identities = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE active ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(identities)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
