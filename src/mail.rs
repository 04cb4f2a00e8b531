use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::SmtpConfig;

/// Outbound delivery of password reset links.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_reset_link(&self, to: &str, link: &str) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("smtp relay {}", config.host))?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        let from = config
            .from_email
            .parse::<Mailbox>()
            .context("parse SMTP_FROM_EMAIL")?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn reset_body(link: &str) -> String {
    format!(
        "We received a request to reset the password for your meeting room account.\n\n\
         Open the link below to choose a new password:\n\n{link}\n\n\
         If you did not ask for this, you can ignore this email."
    )
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_reset_link(&self, to: &str, link: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse::<Mailbox>().context("parse recipient")?)
            .subject("Reset your password")
            .header(ContentType::TEXT_PLAIN)
            .body(reset_body(link))
            .context("build reset email")?;
        self.transport
            .send(message)
            .await
            .context("smtp send")?;
        info!(to = %to, "reset email sent");
        Ok(())
    }
}

/// Development mailer: records that a message would have gone out.
/// The link is never logged because it embeds the reset token.
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send_reset_link(&self, to: &str, _link: &str) -> anyhow::Result<()> {
        warn!(to = %to, "SMTP not configured; reset email dropped");
        Ok(())
    }
}
