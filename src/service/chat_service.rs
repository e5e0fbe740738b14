use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::agent::ProviderGateway;
use crate::config::ProviderConfig;
use crate::db::ConversationStore;
use crate::errors::{AppError, ProviderError};
use crate::intent::IntentClassifier;
use crate::models::{
    ChatRequest, ChatResponse, Conversation, ConversationSummary, Message, ModelSwitch,
};
use crate::notify::{EscalationNotifier, NotificationError};

const MAX_MESSAGE_LENGTH: usize = 8000;

pub const ESCALATION_ACK: &str = "\n\nYour message has been forwarded to the site owner. \
    Thank you for reaching out, you will get a reply as soon as possible.";

/// Bounded retry for retryable provider errors; backoff doubles per attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self { max_retries: config.max_retries, backoff: config.retry_backoff }
    }

    fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Outcome of one successful chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub conversation_id: String,
    pub response: String,
    pub model: String,
    pub escalated: bool,
    /// Set when escalation was attempted and the mailer failed.
    pub notification_error: Option<String>,
}

impl From<ChatTurn> for ChatResponse {
    fn from(turn: ChatTurn) -> Self {
        ChatResponse::reply(turn.response, turn.conversation_id)
    }
}

/// Coordinates a chat request: resolve, classify, escalate, generate, persist.
///
/// Unknown conversation ids are rejected with [`AppError::ConversationNotFound`];
/// ids are only ever issued by this service.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<ProviderGateway>,
    classifier: Arc<dyn IntentClassifier>,
    notifier: Arc<EscalationNotifier>,
    retry: RetryPolicy,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        gateway: Arc<ProviderGateway>,
        classifier: Arc<dyn IntentClassifier>,
        notifier: Arc<EscalationNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, gateway, classifier, notifier, retry }
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    pub async fn get_conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        self.store.list().await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, AppError> {
        self.store.get(id).await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), AppError> {
        if self.store.delete(id).await? {
            info!("Deleted conversation {id}");
            Ok(())
        } else {
            Err(AppError::ConversationNotFound { id: id.to_string() })
        }
    }

    /// Emails the transcript to the admin and stamps `ended_at`. A mail failure
    /// is returned as the soft error; the conversation is marked ended either way.
    pub async fn end_conversation(
        &self,
        id: &str,
        user_email: Option<&str>,
    ) -> Result<Option<NotificationError>, AppError> {
        let conversation = self.store.get(id).await?;
        let outcome = self.notifier.send_snapshot(&conversation, user_email).await.err();
        self.store.mark_ended(id).await?;
        Ok(outcome)
    }

    pub async fn switch_model(&self, model: &str) -> Result<ModelSwitch, AppError> {
        self.gateway.switch_model(model).await
    }

    /// Chat entry point for the HTTP layer: always yields the response shape.
    pub async fn respond(&self, request: ChatRequest) -> (ChatResponse, Option<AppError>) {
        match self.chat(request).await {
            Ok(turn) => (turn.into(), None),
            Err(e) => (ChatResponse::failure(e.to_string()), Some(e)),
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatTurn, AppError> {
        // ── Validation ────────────────────────────────────────────────────────
        let message = request.message.as_deref().map(str::trim).unwrap_or_default();
        if message.is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        if message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: message.chars().count(),
            });
        }
        let user_email = request.user_email.as_deref().map(str::trim).filter(|e| !e.is_empty());

        // ── Resolve conversation ──────────────────────────────────────────────
        let requested_id =
            request.conversation_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
        let turn = self.store.open_turn(requested_id, &self.gateway.active_model()).await?;
        let conversation_id = turn.conversation_id.clone();

        let result = self.run_turn(&conversation_id, message, user_email).await;

        if let Err(e) = self.store.close_turn(&conversation_id).await {
            error!("Failed to close turn on conversation {conversation_id}: {e}");
        }
        // A conversation created for a failed turn was never handed to the client.
        if result.is_err() && turn.created {
            if let Err(e) = self.store.delete(&conversation_id).await {
                error!("Failed to drop conversation {conversation_id} after failed turn: {e}");
            }
        }
        result
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        message: &str,
        user_email: Option<&str>,
    ) -> Result<ChatTurn, AppError> {
        if let Some(email) = user_email {
            self.store.set_user_email(conversation_id, email).await?;
        }
        let conversation = self.store.get(conversation_id).await?;

        // ── Classify & escalate ───────────────────────────────────────────────
        let escalated = self.classifier.classify(message).is_contact_intent;
        let mut notification_error = None;
        if escalated {
            let email = user_email.or(conversation.metadata.user_email.as_deref());
            debug!("Contact intent detected in conversation {conversation_id}");
            if let Err(e) = self.notifier.notify(conversation_id, message, email).await {
                notification_error = Some(e.to_string());
            }
        }

        // ── Generate from stored history plus the pending user message ────────
        let user_message = Message::user(message);
        let mut history = conversation.messages;
        history.push(user_message.clone());

        let (mut response, model) = self.generate_reply(conversation_id, &history).await?;
        if escalated && notification_error.is_none() {
            response.push_str(ESCALATION_ACK);
        }

        // ── Persist both turns only once the reply exists ─────────────────────
        self.store
            .append_turn(conversation_id, user_message, Message::assistant(response.clone()))
            .await?;
        if let Err(e) = self.store.set_model(conversation_id, &model).await {
            error!("Failed to record model for conversation {conversation_id}: {e}");
        }

        Ok(ChatTurn {
            conversation_id: conversation_id.to_string(),
            response,
            model,
            escalated,
            notification_error,
        })
    }

    /// Calls the provider with retry on transient errors and fallback across
    /// candidate models when one is rejected.
    async fn generate_reply(
        &self,
        conversation_id: &str,
        history: &[Message],
    ) -> Result<(String, String), AppError> {
        let mut model = self.gateway.active_model();
        let mut tried: Vec<String> = Vec::new();
        let mut retries = 0;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let err = match self.gateway.complete(history, &model).await {
                Ok(text) => return Ok((text, model)),
                Err(e) => e,
            };

            match err {
                e if e.is_retryable() && retries < self.retry.max_retries => {
                    let delay = self.retry.delay(retries);
                    retries += 1;
                    warn!(
                        "Provider error for conversation {conversation_id} ({e}), \
                         retry {retries}/{} in {delay:?}",
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                e @ ProviderError::ModelUnavailable { .. } => {
                    tried.push(model.clone());
                    match self.gateway.fallback_from(&model) {
                        Some(next) if !tried.contains(&next) => {
                            model = next;
                            retries = 0;
                        }
                        _ => {
                            error!("No fallback model left for conversation {conversation_id}");
                            return Err(AppError::from_provider(e, attempts));
                        }
                    }
                }
                e => {
                    error!("Provider call failed for conversation {conversation_id}: {e}");
                    return Err(AppError::from_provider(e, attempts));
                }
            }
        }
    }
}
