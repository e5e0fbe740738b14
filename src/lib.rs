pub mod agent;
pub mod config;
pub mod db;
pub mod errors;
pub mod intent;
pub mod models;
pub mod notify;
pub mod routes;
pub mod service;

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::{CompletionBackend, GroqBackend, ProviderGateway};
use crate::config::AppConfig;
use crate::db::{ConversationStore, InMemoryConversationStore};
use crate::intent::KeywordClassifier;
use crate::notify::{EscalationNotifier, LogMailer, Mailer, SmtpMailer};
use crate::service::chat_service::{ChatService, RetryPolicy};

pub use routes::create_router;

/// Wires the chat service from configuration, with explicit backends for the
/// provider and the mailer.
pub fn build_service(
    config: &AppConfig,
    backend: Arc<dyn CompletionBackend>,
    mailer: Arc<dyn Mailer>,
) -> ChatService {
    let store: Arc<dyn ConversationStore> = match config.max_conversations {
        Some(capacity) => Arc::new(InMemoryConversationStore::with_capacity(capacity)),
        None => Arc::new(InMemoryConversationStore::new()),
    };
    let gateway = Arc::new(ProviderGateway::new(backend, &config.provider));
    let notifier = Arc::new(EscalationNotifier::new(mailer, config.email.admin_email.clone()));

    ChatService::new(
        store,
        gateway,
        Arc::new(KeywordClassifier::default()),
        notifier,
        RetryPolicy::from_config(&config.provider),
    )
}

/// Production wiring: Groq through rig, SMTP when credentials are present.
pub fn build_default_service(config: &AppConfig) -> ChatService {
    let backend = Arc::new(GroqBackend::new(&config.provider));
    if !backend.is_ready() {
        warn!("GROQ_API_KEY not set, chat requests will fail until it is configured");
    }

    let mailer: Arc<dyn Mailer> = match SmtpMailer::from_config(&config.email) {
        Some(Ok(smtp)) => {
            info!("SMTP mailer configured via {}:{}", config.email.host, config.email.port);
            Arc::new(smtp)
        }
        Some(Err(e)) => {
            warn!("SMTP mailer unavailable ({e}), notifications will only be logged");
            Arc::new(LogMailer)
        }
        None => {
            warn!("EMAIL_USER/EMAIL_PASSWORD not set, notifications will only be logged");
            Arc::new(LogMailer)
        }
    };

    build_service(config, backend, mailer)
}
