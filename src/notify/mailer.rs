use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as EmailMessage, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::config::EmailConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("failed to build email: {0}")]
    Build(String),

    #[error("email transport failed: {0}")]
    Transport(String),

    #[error("SMTP is not configured; email to {to} was logged, not sent")]
    NotConfigured { to: String },
}

/// Outbound email collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// STARTTLS SMTP delivery through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(port)
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .build();
        Ok(Self { transport, from: user.to_string() })
    }

    /// `None` when the config lacks SMTP credentials.
    pub fn from_config(config: &EmailConfig) -> Option<Result<Self, MailError>> {
        config
            .smtp_credentials()
            .map(|(user, password)| Self::new(&config.host, config.port, user, password))
    }
}

fn parse_mailbox(address: &str) -> Result<lettre::message::Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let email = EmailMessage::builder()
            .from(parse_mailbox(&self.from)?)
            .to(parse_mailbox(to)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        info!("Email '{subject}' sent to {to}");
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them. Used when SMTP
/// credentials are not configured; every send reports `NotConfigured`.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        info!(to, subject, "SMTP not configured, logging email instead:\n{body}");
        Err(MailError::NotConfigured { to: to.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_reports_nothing_was_delivered() {
        let err = LogMailer.send("admin@example.com", "Subject", "Body").await.unwrap_err();
        assert!(matches!(err, MailError::NotConfigured { ref to } if to == "admin@example.com"));
    }
}
