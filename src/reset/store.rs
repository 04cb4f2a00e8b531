use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::token::ResetToken;

/// The slice of a user the reset flow needs.
#[derive(Debug, Clone, FromRow)]
pub struct ResetUser {
    pub id: Uuid,
    pub email: String,
}

/// Outcome of the guarded `used = false -> true` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// Token claimed and credential replaced in one unit.
    Redeemed,
    /// Token was used, expired or gone by the time the guard ran.
    Rejected,
}

/// Identity lookup plus reset-token persistence.
#[async_trait]
pub trait ResetStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<ResetUser>>;

    /// Persist a fresh token; with `invalidate_previous` the user's outstanding
    /// tokens are marked used in the same unit of work.
    async fn insert_token(&self, token: &ResetToken, invalidate_previous: bool)
        -> anyhow::Result<()>;

    async fn find_token(&self, id: &str) -> anyhow::Result<Option<ResetToken>>;

    /// Atomically mark the token used (only if still unused and unexpired at
    /// `now`) and set the owner's password hash.
    async fn redeem(
        &self,
        id: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Redemption>;
}

#[derive(Clone)]
pub struct PgResetStore {
    db: PgPool,
}

impl PgResetStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResetStore for PgResetStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<ResetUser>> {
        let user = sqlx::query_as::<_, ResetUser>(
            r#"
            SELECT id, email
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert_token(
        &self,
        token: &ResetToken,
        invalidate_previous: bool,
    ) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        if invalidate_previous {
            // Concurrent requests for one user queue on the owner's row, so the
            // second invalidation sees the first one's committed token.
            sqlx::query(
                r#"
                SELECT id
                FROM users
                WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(token.user_id)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE password_reset_tokens
                SET used = TRUE
                WHERE user_id = $1 AND used = FALSE
                "#,
            )
            .bind(token.user_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, created_at, expires_at, used)
            VALUES ($1, $2, $3, $4, FALSE)
            "#,
        )
        .bind(&token.id)
        .bind(token.user_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_token(&self, id: &str) -> anyhow::Result<Option<ResetToken>> {
        let token = sqlx::query_as::<_, ResetToken>(
            r#"
            SELECT id, user_id, created_at, expires_at, used
            FROM password_reset_tokens
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(token)
    }

    async fn redeem(
        &self,
        id: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Redemption> {
        let mut tx = self.db.begin().await?;

        // Row-level compare-and-set: concurrent confirmations serialize on the
        // row lock and only the first one sees `used = FALSE`.
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE password_reset_tokens
            SET used = TRUE
            WHERE id = $1 AND used = FALSE AND expires_at >= $2
            RETURNING user_id
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            tx.rollback().await?;
            return Ok(Redemption::Rejected);
        };

        let updated = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1
            WHERE id = $2
            "#,
        )
        .bind(password_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            anyhow::bail!("reset token owner {user_id} no longer exists");
        }

        tx.commit().await?;
        Ok(Redemption::Redeemed)
    }
}
