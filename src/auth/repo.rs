use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::auth::repo_types::{NewUser, User};

/// Tables holding rows owned by a user, deleted before the user row.
pub const DEPENDENT_TABLES: [&str; 4] = ["favorite_places", "favorite_routes", "passed_routes", "reviews"];

const USER_COLUMNS: &str = "id, name, email, password_hash, role, is_active, reset_code, \
                            reset_code_expires_at, created_at, updated_at";

/// Persistence of user credentials. Every multi-row mutation is all-or-nothing.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a user by exact email, active or not.
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;

    async fn find_by_reset_code(&self, code: &str) -> anyhow::Result<Option<User>>;

    /// Insert an active user.
    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<User>;

    async fn update_profile(&self, id: i64, name: &str, email: &str) -> anyhow::Result<User>;

    /// Replace any previous code for the user.
    async fn set_reset_code(
        &self,
        id: i64,
        code: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    async fn update_password(&self, id: i64, password_hash: &str) -> anyhow::Result<()>;

    /// Store the new hash and clear the reset code in one step, provided the
    /// user still holds `code` and it is unexpired at `now`. Returns whether
    /// the change was applied.
    async fn reset_password(
        &self,
        id: i64,
        code: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;

    /// Returns `false` when no such user exists.
    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<bool>;

    /// Delete the user together with favorites, passed routes and reviews.
    /// Returns `false` (and changes nothing) when no such user exists.
    async fn delete_cascade(&self, id: i64) -> anyhow::Result<bool>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, predicate: &str, bind: QueryArg<'_>) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        let query = sqlx::query_as::<_, User>(&sql);
        let query = match bind {
            QueryArg::Text(v) => query.bind(v),
            QueryArg::Id(v) => query.bind(v),
        };
        let user = query.fetch_optional(&self.db).await?;
        Ok(user)
    }
}

enum QueryArg<'a> {
    Text(&'a str),
    Id(i64),
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.find_one("email = $1", QueryArg::Text(email))
            .await
            .context("find user by email")
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        self.find_one("id = $1", QueryArg::Id(id))
            .await
            .context("find user by id")
    }

    async fn find_by_reset_code(&self, code: &str) -> anyhow::Result<Option<User>> {
        self.find_one("reset_code = $1", QueryArg::Text(code))
            .await
            .context("find user by reset code")
    }

    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<User> {
        let sql = format!(
            "INSERT INTO users (name, email, password_hash, role, is_active) \
             VALUES ($1, $2, $3, $4, TRUE) \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(new.name)
            .bind(new.email)
            .bind(new.password_hash)
            .bind(new.role.as_str())
            .fetch_one(&self.db)
            .await
            .context("insert user")?;
        Ok(user)
    }

    async fn update_profile(&self, id: i64, name: &str, email: &str) -> anyhow::Result<User> {
        let sql = format!(
            "UPDATE users SET name = $2, email = $3, updated_at = now() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(name)
            .bind(email)
            .fetch_one(&self.db)
            .await
            .context("update profile")?;
        Ok(user)
    }

    async fn set_reset_code(
        &self,
        id: i64,
        code: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET reset_code = $2, reset_code_expires_at = $3, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(expires_at)
        .execute(&self.db)
        .await
        .context("store reset code")?;
        Ok(())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await
        .context("update password")?;
        Ok(())
    }

    async fn reset_password(
        &self,
        id: i64,
        code: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let held: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id
              FROM users
             WHERE id = $1 AND reset_code = $2 AND reset_code_expires_at >= $3
               FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("lock reset code")?;

        if held.is_none() {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2,
                   reset_code = NULL,
                   reset_code_expires_at = NULL,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&mut *tx)
        .await
        .context("apply password reset")?;

        tx.commit().await.context("commit tx")?;
        Ok(true)
    }

    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.db)
            .await
            .context("set user active flag")?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_cascade(&self, id: i64) -> anyhow::Result<bool> {
        // Dropping `tx` on any early return rolls everything back.
        let mut tx = self.db.begin().await.context("begin tx")?;

        for table in DEPENDENT_TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE user_id = $1"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("delete from {table}"))?;
        }

        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete user")?;

        if res.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit().await.context("commit tx")?;
        Ok(true)
    }
}
