use std::{fmt, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResetConfig {
    pub ttl_minutes: i64,
    pub link_base_url: String,
    /// Mark a user's outstanding tokens used when a new one is requested.
    pub invalidate_previous: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    /// Key clients by the rightmost `X-Forwarded-For` hop (appended by the
    /// reverse proxy) instead of the peer address.
    pub trust_proxy: bool,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_email", &self.from_email)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt: JwtConfig,
    pub reset: ResetConfig,
    pub rate_limit: RateLimitConfig,
    pub smtp: Option<SmtpConfig>,
    pub external_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24),
        };
        let reset = ResetConfig {
            ttl_minutes: env_or("RESET_TTL_MINUTES", 30),
            link_base_url: std::env::var("RESET_LINK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/reset-password".into()),
            invalidate_previous: env_or("RESET_INVALIDATE_PREVIOUS", true),
        };
        let rate_limit = RateLimitConfig {
            max_requests: env_or("RATE_LIMIT_MAX", 100),
            window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 60 * 60),
            trust_proxy: env_or("RATE_LIMIT_TRUST_PROXY", false),
        };
        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: env_or("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                from_email: std::env::var("SMTP_FROM_EMAIL")
                    .context("SMTP_FROM_EMAIL is required when SMTP_HOST is set")?,
            }),
            _ => None,
        };

        let config = Self {
            database_url,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080),
            jwt,
            reset,
            rate_limit,
            smtp,
            external_timeout_secs: env_or("EXTERNAL_TIMEOUT_SECS", 10),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.jwt.ttl_minutes <= 0 {
            anyhow::bail!("JWT_TTL_MINUTES must be positive");
        }
        if self.reset.ttl_minutes <= 0 {
            anyhow::bail!("RESET_TTL_MINUTES must be positive");
        }
        if self.rate_limit.window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_WINDOW_SECS must be positive");
        }
        Ok(())
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
