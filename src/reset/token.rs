use std::fmt;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Random bytes behind every reset token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Opaque, single-use password reset token as stored in `password_reset_tokens`.
#[derive(Clone, FromRow)]
pub struct ResetToken {
    pub id: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub used: bool,
}

impl ResetToken {
    pub fn issue(user_id: Uuid, ttl: Duration, now: OffsetDateTime) -> Self {
        Self {
            id: generate_token(),
            user_id,
            created_at: now,
            expires_at: now + ttl,
            used: false,
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    pub fn is_actionable_at(&self, now: OffsetDateTime) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

// The id is a bearer secret; keep it out of logs.
impl fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetToken")
            .field("id", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("used", &self.used)
            .finish()
    }
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}
