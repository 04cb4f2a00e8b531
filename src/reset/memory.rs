use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex as TokioMutex;
use uuid::Uuid;

use super::{
    store::{Redemption, ResetStore, ResetUser},
    token::ResetToken,
};

struct MemoryData {
    users: HashMap<Uuid, MemoryUser>,  // user_id -> user
    tokens: HashMap<String, ResetToken>, // token id -> token
}

struct MemoryUser {
    email: String,
    password_hash: String,
}

/// In-memory reset store (tests and local development without Postgres).
///
/// One lock guards users and tokens together, so `redeem` is a single
/// critical section exactly like the Postgres transaction.
pub struct MemoryResetStore {
    data: TokioMutex<MemoryData>,
}

impl Default for MemoryResetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResetStore {
    pub fn new() -> Self {
        Self {
            data: TokioMutex::new(MemoryData {
                users: HashMap::new(),
                tokens: HashMap::new(),
            }),
        }
    }

    pub async fn add_user(&self, email: &str, password_hash: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut data = self.data.lock().await;
        data.users.insert(
            id,
            MemoryUser {
                email: email.to_lowercase(),
                password_hash: password_hash.to_owned(),
            },
        );
        id
    }

    pub async fn password_hash(&self, user_id: Uuid) -> Option<String> {
        let data = self.data.lock().await;
        data.users.get(&user_id).map(|u| u.password_hash.clone())
    }

    pub async fn tokens_for(&self, user_id: Uuid) -> Vec<ResetToken> {
        let data = self.data.lock().await;
        data.tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResetStore for MemoryResetStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<ResetUser>> {
        let data = self.data.lock().await;
        let email = email.to_lowercase();
        Ok(data
            .users
            .iter()
            .find(|(_, u)| u.email == email)
            .map(|(id, u)| ResetUser {
                id: *id,
                email: u.email.clone(),
            }))
    }

    async fn insert_token(
        &self,
        token: &ResetToken,
        invalidate_previous: bool,
    ) -> anyhow::Result<()> {
        let mut data = self.data.lock().await;
        if data.tokens.contains_key(&token.id) {
            anyhow::bail!("duplicate reset token id");
        }
        if invalidate_previous {
            for previous in data.tokens.values_mut() {
                if previous.user_id == token.user_id {
                    previous.used = true;
                }
            }
        }
        data.tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn find_token(&self, id: &str) -> anyhow::Result<Option<ResetToken>> {
        let data = self.data.lock().await;
        Ok(data.tokens.get(id).cloned())
    }

    async fn redeem(
        &self,
        id: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Redemption> {
        let mut data = self.data.lock().await;
        let user_id = match data.tokens.get(id) {
            Some(token) if token.is_actionable_at(now) => token.user_id,
            _ => return Ok(Redemption::Rejected),
        };
        let Some(user) = data.users.get_mut(&user_id) else {
            anyhow::bail!("reset token owner {user_id} no longer exists");
        };
        user.password_hash = password_hash.to_owned();
        if let Some(token) = data.tokens.get_mut(id) {
            token.used = true;
        }
        Ok(Redemption::Redeemed)
    }
}
