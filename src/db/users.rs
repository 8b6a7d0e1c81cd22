use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::User;

pub struct UserStore;

impl UserStore {
    pub async fn create(
        pool: &SqlitePool,
        username: &str,
        email: Option<&str>,
        auto_approve: bool,
    ) -> anyhow::Result<User> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, auto_approve, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             RETURNING *",
        )
        .bind(username)
        .bind(email)
        .bind(auto_approve)
        .bind(now)
        .fetch_one(pool)
        .await?;
        Ok(user)
    }

    pub async fn get_by_username(pool: &SqlitePool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn get_or_create(pool: &SqlitePool, username: &str) -> anyhow::Result<User> {
        if let Some(user) = Self::get_by_username(pool, username).await? {
            return Ok(user);
        }
        Self::create(pool, username, None, false).await
    }

    pub async fn list_all(pool: &SqlitePool) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username")
            .fetch_all(pool)
            .await?;
        Ok(users)
    }

    /// Authoritative refresh from the identity-provider group on login.
    pub async fn set_auto_approval(
        pool: &SqlitePool,
        user_id: i64,
        auto_approve: bool,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET auto_approve = $1, updated_at = $2 WHERE id = $3")
            .bind(auto_approve)
            .bind(Utc::now())
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
