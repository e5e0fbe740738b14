//! Admin escalation over email.

pub mod mailer;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

pub use mailer::{LogMailer, MailError, Mailer, SmtpMailer};

use crate::intent::{extract_contact_info, extract_contact_message};
use crate::models::Conversation;

pub const EMAIL_NOT_PROVIDED: &str = "not provided";

/// Soft failure: reported to the caller, never turned into a chat error.
#[derive(Debug, Error)]
#[error("failed to notify admin about conversation {conversation_id}: {source}")]
pub struct NotificationError {
    pub conversation_id: String,
    #[source]
    pub source: MailError,
}

/// Composed admin email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn contact_request(
        conversation_id: &str,
        user_message: &str,
        user_email: Option<&str>,
    ) -> Self {
        let contact = extract_contact_info(user_message);
        let email = user_email.or(contact.email.as_deref()).unwrap_or(EMAIL_NOT_PROVIDED);
        let sender = contact.name.as_deref().unwrap_or("visitor");

        let subject = match user_email.or(contact.email.as_deref()) {
            Some(addr) => format!("Portfolio contact from {addr}"),
            None => format!("Portfolio contact from {sender}"),
        };
        let body = format!(
            "Conversation: {conversation_id}\nFrom: {sender} (email: {email})\n\n{}\n\n\
             --- Original message ---\n{user_message}",
            extract_contact_message(user_message)
        );
        Self { subject, body }
    }

    pub fn snapshot(conversation: &Conversation, user_email: Option<&str>) -> Self {
        let email = user_email
            .or(conversation.metadata.user_email.as_deref())
            .unwrap_or(EMAIL_NOT_PROVIDED);
        Self {
            subject: format!("Conversation snapshot {}", conversation.id),
            body: format!("From: {email}\n\n{}", conversation.snapshot()),
        }
    }
}

pub struct EscalationNotifier {
    mailer: Arc<dyn Mailer>,
    admin_email: String,
}

impl EscalationNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, admin_email: impl Into<String>) -> Self {
        Self { mailer, admin_email: admin_email.into() }
    }

    pub async fn notify(
        &self,
        conversation_id: &str,
        user_message: &str,
        user_email: Option<&str>,
    ) -> Result<(), NotificationError> {
        let notification = Notification::contact_request(conversation_id, user_message, user_email);
        self.dispatch(conversation_id, notification).await
    }

    /// Emails the full transcript to the admin.
    pub async fn send_snapshot(
        &self,
        conversation: &Conversation,
        user_email: Option<&str>,
    ) -> Result<(), NotificationError> {
        self.dispatch(&conversation.id, Notification::snapshot(conversation, user_email)).await
    }

    async fn dispatch(
        &self,
        conversation_id: &str,
        notification: Notification,
    ) -> Result<(), NotificationError> {
        match self.mailer.send(&self.admin_email, &notification.subject, &notification.body).await {
            Ok(()) => {
                info!("Admin notified for conversation {conversation_id}");
                Ok(())
            }
            Err(source) => {
                warn!("Admin notification failed for conversation {conversation_id}: {source}");
                Err(NotificationError { conversation_id: conversation_id.to_string(), source })
            }
        }
    }
}
