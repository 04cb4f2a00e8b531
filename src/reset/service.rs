use std::{future::Future, sync::Arc, time::Duration};

use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    store::{Redemption, ResetStore},
    token::ResetToken,
};
use crate::{auth::password::hash_password_blocking, config::AppConfig, mail::Mailer};

#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("reset token not found")]
    TokenNotFound,
    #[error("reset token expired")]
    TokenExpired,
    #[error("reset token already used")]
    TokenAlreadyUsed,
    #[error("identity lookup failed")]
    IdentityLookupFailed,
    #[error("password reset temporarily unavailable")]
    Unavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ResetError {
    pub fn code(&self) -> &'static str {
        match self {
            ResetError::TokenNotFound => "token_not_found",
            ResetError::TokenExpired => "expired_token",
            ResetError::TokenAlreadyUsed => "token_already_used",
            ResetError::IdentityLookupFailed => "identity_lookup_failed",
            ResetError::Unavailable => "unavailable",
            ResetError::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResetSettings {
    pub ttl: TimeDuration,
    pub link_base_url: String,
    pub invalidate_previous: bool,
    /// Upper bound for each call into the store or the mailer.
    pub io_timeout: Duration,
}

impl ResetSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ttl: TimeDuration::minutes(config.reset.ttl_minutes),
            link_base_url: config.reset.link_base_url.clone(),
            invalidate_previous: config.reset.invalidate_previous,
            io_timeout: config.external_timeout(),
        }
    }
}

/// Issues and redeems single-use password reset tokens.
#[derive(Clone)]
pub struct ResetManager {
    store: Arc<dyn ResetStore>,
    mailer: Arc<dyn Mailer>,
    settings: ResetSettings,
}

impl ResetManager {
    pub fn new(store: Arc<dyn ResetStore>, mailer: Arc<dyn Mailer>, settings: ResetSettings) -> Self {
        Self {
            store,
            mailer,
            settings,
        }
    }

    /// Returns the link queued for email for a known address and `None`
    /// otherwise. The link exists only for the email step and must never
    /// reach an unauthenticated response.
    pub async fn request_reset(&self, email: &str) -> Result<Option<String>, ResetError> {
        let user = self
            .bounded("find_user_by_email", self.store.find_user_by_email(email))
            .await
            .map_err(|e| {
                error!(error = %e, "reset identity lookup failed");
                ResetError::IdentityLookupFailed
            })?;

        let Some(user) = user else {
            debug!("reset requested for unknown email");
            return Ok(None);
        };

        let token = ResetToken::issue(user.id, self.settings.ttl, OffsetDateTime::now_utc());
        self.bounded(
            "insert_token",
            self.store
                .insert_token(&token, self.settings.invalidate_previous),
        )
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user.id, "persisting reset token failed");
            ResetError::Unavailable
        })?;

        let link = self.link_for(&token.id);
        info!(user_id = %user.id, expires_at = %token.expires_at, "password reset issued");
        self.spawn_delivery(user.id, user.email, link.clone());
        Ok(Some(link))
    }

    /// Delivers the link off the request path; failures are only logged.
    fn spawn_delivery(&self, user_id: Uuid, email: String, link: String) {
        let mailer = self.mailer.clone();
        let timeout = self.settings.io_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, mailer.send_reset_link(&email, &link)).await {
                Ok(Ok(())) => debug!(user_id = %user_id, "reset email delivered"),
                Ok(Err(e)) => error!(error = %e, user_id = %user_id, "sending reset email failed"),
                Err(_) => error!(user_id = %user_id, ?timeout, "sending reset email timed out"),
            }
        });
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ResetError> {
        let stored = self
            .bounded("find_token", self.store.find_token(token))
            .await
            .map_err(|e| {
                error!(error = %e, "reset token lookup failed");
                ResetError::Unavailable
            })?
            .ok_or(ResetError::TokenNotFound)?;

        let now = OffsetDateTime::now_utc();
        if stored.is_expired_at(now) {
            warn!(user_id = %stored.user_id, "expired reset token presented");
            return Err(ResetError::TokenExpired);
        }
        if stored.used {
            warn!(user_id = %stored.user_id, "used reset token presented");
            return Err(ResetError::TokenAlreadyUsed);
        }

        let hash = hash_password_blocking(new_password.to_owned()).await?;

        let outcome = self
            .bounded(
                "redeem",
                self.store.redeem(token, &hash, OffsetDateTime::now_utc()),
            )
            .await
            .map_err(|e| {
                error!(error = %e, user_id = %stored.user_id, "redeeming reset token failed");
                ResetError::Unavailable
            })?;

        match outcome {
            Redemption::Redeemed => {
                info!(user_id = %stored.user_id, "password reset completed");
                Ok(())
            }
            // Lost the race to a concurrent confirmation, or expired in between.
            Redemption::Rejected => {
                if stored.expires_at < OffsetDateTime::now_utc() {
                    Err(ResetError::TokenExpired)
                } else {
                    Err(ResetError::TokenAlreadyUsed)
                }
            }
        }
    }

    fn link_for(&self, token: &str) -> String {
        let sep = if self.settings.link_base_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}token={}", self.settings.link_base_url, sep, token)
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.settings.io_timeout, fut).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("{what} timed out after {:?}", self.settings.io_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{auth::password::verify_password, reset::memory::MemoryResetStore};

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_reset_link(&self, to: &str, link: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((to.to_owned(), link.to_owned()));
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send_reset_link(&self, _to: &str, _link: &str) -> anyhow::Result<()> {
            anyhow::bail!("smtp down")
        }
    }

    struct StalledMailer;

    #[async_trait]
    impl Mailer for StalledMailer {
        async fn send_reset_link(&self, _to: &str, _link: &str) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn settings() -> ResetSettings {
        ResetSettings {
            ttl: TimeDuration::minutes(30),
            link_base_url: "https://rooms.example/reset-password".into(),
            invalidate_previous: true,
            io_timeout: Duration::from_secs(5),
        }
    }

    async fn wait_for_mail(mailer: &RecordingMailer, count: usize) -> Vec<(String, String)> {
        for _ in 0..200 {
            let sent = mailer.sent.lock().unwrap().clone();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} reset email(s)");
    }

    fn token_of(link: &str) -> &str {
        link.split("token=").nth(1).expect("token in link")
    }

    async fn setup() -> (ResetManager, Arc<MemoryResetStore>, Arc<RecordingMailer>, uuid::Uuid) {
        let store = Arc::new(MemoryResetStore::new());
        let user_id = store.add_user("alice@example.com", "old-hash").await;
        let mailer = Arc::new(RecordingMailer::default());
        let manager = ResetManager::new(store.clone(), mailer.clone(), settings());
        (manager, store, mailer, user_id)
    }

    #[tokio::test]
    async fn request_emails_link_for_known_user() {
        let (manager, store, mailer, user_id) = setup().await;
        let link = manager
            .request_reset("alice@example.com")
            .await
            .unwrap()
            .expect("link for known user");

        assert!(link.starts_with("https://rooms.example/reset-password?token="));
        let sent = wait_for_mail(&mailer, 1).await;
        assert_eq!(sent, vec![("alice@example.com".to_owned(), link.clone())]);

        let tokens = store.tokens_for(user_id).await;
        assert_eq!(tokens.len(), 1);
        assert!(!tokens[0].used);
        assert_eq!(tokens[0].id, token_of(&link));
        assert_eq!(tokens[0].expires_at - tokens[0].created_at, TimeDuration::minutes(30));
    }

    #[tokio::test]
    async fn unknown_email_is_silent() {
        let (manager, _, mailer, _) = setup().await;
        assert!(manager
            .request_reset("nobody@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let (manager, store, _, user_id) = setup().await;
        let link = manager.request_reset("alice@example.com").await.unwrap().unwrap();
        let token = token_of(&link);

        manager.reset_password(token, "n3w-passw0rd").await.expect("first use");
        let hash = store.password_hash(user_id).await.unwrap();
        assert!(verify_password("n3w-passw0rd", &hash).unwrap());

        let err = manager.reset_password(token, "another-pass").await.unwrap_err();
        assert!(matches!(err, ResetError::TokenAlreadyUsed), "{err:?}");
        let hash = store.password_hash(user_id).await.unwrap();
        assert!(verify_password("n3w-passw0rd", &hash).unwrap());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (manager, store, _, user_id) = setup().await;
        let issued = OffsetDateTime::now_utc() - TimeDuration::hours(2);
        let token = ResetToken::issue(user_id, TimeDuration::minutes(30), issued);
        store.insert_token(&token, false).await.unwrap();

        let err = manager.reset_password(&token.id, "n3w-passw0rd").await.unwrap_err();
        assert!(matches!(err, ResetError::TokenExpired), "{err:?}");
        assert_eq!(store.password_hash(user_id).await.as_deref(), Some("old-hash"));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let (manager, _, _, _) = setup().await;
        let err = manager.reset_password("no-such-token", "n3w-passw0rd").await.unwrap_err();
        assert!(matches!(err, ResetError::TokenNotFound));
    }

    #[tokio::test]
    async fn new_request_invalidates_previous_token() {
        let (manager, _, _, _) = setup().await;
        let first = manager.request_reset("alice@example.com").await.unwrap().unwrap();
        let second = manager.request_reset("alice@example.com").await.unwrap().unwrap();

        let err = manager.reset_password(token_of(&first), "n3w-passw0rd").await.unwrap_err();
        assert!(matches!(err, ResetError::TokenAlreadyUsed));
        manager
            .reset_password(token_of(&second), "n3w-passw0rd")
            .await
            .expect("latest token works");
    }

    #[tokio::test]
    async fn previous_tokens_survive_when_invalidation_is_off() {
        let store = Arc::new(MemoryResetStore::new());
        store.add_user("alice@example.com", "old-hash").await;
        let manager = ResetManager::new(
            store,
            Arc::new(RecordingMailer::default()),
            ResetSettings {
                invalidate_previous: false,
                ..settings()
            },
        );
        let first = manager.request_reset("alice@example.com").await.unwrap().unwrap();
        manager.request_reset("alice@example.com").await.unwrap().unwrap();
        manager
            .reset_password(token_of(&first), "n3w-passw0rd")
            .await
            .expect("older token still valid");
    }

    #[tokio::test]
    async fn mail_failure_does_not_surface_to_caller() {
        let store = Arc::new(MemoryResetStore::new());
        let user_id = store.add_user("alice@example.com", "old-hash").await;
        let manager = ResetManager::new(store.clone(), Arc::new(FailingMailer), settings());
        let outcome = manager.request_reset("alice@example.com").await.unwrap();
        assert!(outcome.is_some());
        assert_eq!(store.tokens_for(user_id).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_mailer_does_not_delay_response() {
        let store = Arc::new(MemoryResetStore::new());
        store.add_user("alice@example.com", "old-hash").await;
        let manager = ResetManager::new(store, Arc::new(StalledMailer), settings());

        let started = tokio::time::Instant::now();
        let known = manager.request_reset("alice@example.com").await.unwrap();
        let unknown = manager.request_reset("nobody@example.com").await.unwrap();
        assert!(known.is_some());
        assert!(unknown.is_none());
        assert!(started.elapsed() < settings().io_timeout);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirmations_succeed_exactly_once() {
        const N: usize = 8;
        let (manager, _, _, _) = setup().await;
        let link = manager.request_reset("alice@example.com").await.unwrap().unwrap();
        let token = token_of(&link).to_owned();

        let mut handles = Vec::with_capacity(N);
        for i in 0..N {
            let manager = manager.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                manager.reset_password(&token, &format!("password-{i}")).await
            }));
        }

        let mut successes = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(ResetError::TokenAlreadyUsed) => already_used += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(already_used, N - 1);
    }

    #[test]
    fn link_respects_existing_query() {
        let manager = ResetManager::new(
            Arc::new(MemoryResetStore::new()),
            Arc::new(RecordingMailer::default()),
            ResetSettings {
                link_base_url: "https://rooms.example/reset?lang=en".into(),
                ..settings()
            },
        );
        assert_eq!(
            manager.link_for("abc"),
            "https://rooms.example/reset?lang=en&token=abc"
        );
    }
}
