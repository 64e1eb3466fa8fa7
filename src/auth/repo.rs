use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, User};
use crate::error::StoreFault;

/// User-store collaborator contract. The auth layer depends on this trait
/// only, so the flows can run against an in-memory store in tests.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreFault>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreFault>;
    async fn find_by_reset_token(
        &self,
        token_digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreFault>;
    async fn create(&self, new_user: NewUser) -> Result<User, StoreFault>;
    async fn set_reset_token(
        &self,
        id: Uuid,
        token_digest: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> Result<(), StoreFault>;
    /// Sets the new hash, stamps `password_changed_at` and clears any
    /// outstanding reset token in one statement.
    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<(), StoreFault>;
    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, StoreFault>;
    async fn deactivate(&self, id: Uuid) -> Result<(), StoreFault>;
    async fn list(&self) -> Result<Vec<User>, StoreFault>;
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique(e: sqlx::Error, value: &str) -> StoreFault {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StoreFault::Duplicate {
                value: value.to_string(),
            };
        }
    }
    StoreFault::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreFault> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, role, password_changed_at,
                   password_reset_token, password_reset_expires, active, created_at
            FROM users
            WHERE email = $1 AND active
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreFault> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, role, password_changed_at,
                   password_reset_token, password_reset_expires, active, created_at
            FROM users
            WHERE id = $1 AND active
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_reset_token(
        &self,
        token_digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreFault> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, role, password_changed_at,
                   password_reset_token, password_reset_expires, active, created_at
            FROM users
            WHERE password_reset_token = $1 AND password_reset_expires >= $2 AND active
            "#,
        )
        .bind(token_digest)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreFault> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, role, password_changed_at,
                      password_reset_token, password_reset_expires, active, created_at
            "#,
        )
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique(e, &new_user.email))?;
        Ok(user)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_digest: Option<&str>,
        expires: Option<OffsetDateTime>,
    ) -> Result<(), StoreFault> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = $2, password_reset_expires = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_digest)
        .bind(expires)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<(), StoreFault> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_changed_at = $3,
                password_reset_token = NULL,
                password_reset_expires = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, StoreFault> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = COALESCE($2, name), email = COALESCE($3, email)
            WHERE id = $1
            RETURNING id, name, email, password_hash, role, password_changed_at,
                      password_reset_token, password_reset_expires, active, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique(e, email.unwrap_or_default()))?;
        Ok(user)
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StoreFault> {
        sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, StoreFault> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, role, password_changed_at,
                   password_reset_token, password_reset_expires, active, created_at
            FROM users
            WHERE active
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }
}
