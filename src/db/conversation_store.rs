use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Conversation, ConversationSummary, Message};

/// Storage capability the chat service depends on. The in-memory backend below
/// is the only one shipped; a durable backend implements the same trait.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Allocates a fresh id with empty history, stamped with `model`.
    async fn create(&self, model: &str) -> Result<String, AppError>;

    async fn get(&self, id: &str) -> Result<Conversation, AppError>;

    async fn append(&self, id: &str, message: Message) -> Result<(), AppError>;

    /// Appends a user message and its reply as one step.
    async fn append_turn(&self, id: &str, user: Message, reply: Message) -> Result<(), AppError>;

    /// Resolves `id` (or creates a conversation when `None`) and marks a turn
    /// in flight on it. In-flight conversations are never evicted.
    async fn open_turn(&self, id: Option<&str>, model: &str) -> Result<OpenTurn, AppError>;

    /// Ends a turn opened by [`ConversationStore::open_turn`]. Missing ids are ignored.
    async fn close_turn(&self, id: &str) -> Result<(), AppError>;

    /// Keeps the first non-empty email; later calls are no-ops.
    async fn set_user_email(&self, id: &str, email: &str) -> Result<(), AppError>;

    async fn set_model(&self, id: &str, model: &str) -> Result<(), AppError>;

    async fn mark_ended(&self, id: &str) -> Result<(), AppError>;

    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    /// Summaries in creation order.
    async fn list(&self) -> Result<Vec<ConversationSummary>, AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTurn {
    pub conversation_id: String,
    /// The conversation was created for this turn.
    pub created: bool,
}

struct Entry {
    seq: u64,
    in_flight: usize,
    conversation: Conversation,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, AppError> {
        self.conversations
            .get_mut(id)
            .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })
    }

    /// Drops the idle conversation with the oldest activity.
    fn evict_least_recent(&mut self) -> Option<String> {
        let victim = self
            .conversations
            .iter()
            .filter(|(_, e)| e.in_flight == 0)
            .min_by_key(|(_, e)| (e.conversation.metadata.updated_at, e.seq))
            .map(|(id, _)| id.clone())?;
        self.conversations.remove(&victim);
        Some(victim)
    }

    /// Inserts a fresh conversation, evicting idle ones past `capacity`.
    /// When every stored conversation has a turn in flight the store grows
    /// past capacity until one of them goes idle.
    fn insert_new(&mut self, model: &str, capacity: Option<usize>) -> String {
        let mut id = Uuid::new_v4().to_string();
        while self.conversations.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }

        if let Some(capacity) = capacity {
            while self.conversations.len() >= capacity {
                match self.evict_least_recent() {
                    Some(evicted) => info!("Evicted conversation {evicted} (capacity {capacity})"),
                    None => break,
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = Entry { seq, in_flight: 0, conversation: Conversation::new(id.clone(), model) };
        self.conversations.insert(id.clone(), entry);
        debug!("Created conversation {id} with model {model}");
        id
    }
}

/// Process-lifetime store. Every operation takes the lock for local map work
/// only, so appends are atomic with respect to readers.
#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: RwLock<Inner>,
    capacity: Option<usize>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounded store: creating past `capacity` evicts the least-recently-active conversation.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: RwLock::default(), capacity: Some(capacity.max(1)) }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, model: &str) -> Result<String, AppError> {
        Ok(self.write().insert_new(model, self.capacity))
    }

    async fn get(&self, id: &str) -> Result<Conversation, AppError> {
        self.read()
            .conversations
            .get(id)
            .map(|e| e.conversation.clone())
            .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })
    }

    async fn append(&self, id: &str, message: Message) -> Result<(), AppError> {
        let mut inner = self.write();
        let conversation = &mut inner.entry_mut(id)?.conversation;
        conversation.metadata.updated_at = message.timestamp.max(conversation.metadata.updated_at);
        conversation.messages.push(message);
        Ok(())
    }

    async fn append_turn(&self, id: &str, user: Message, reply: Message) -> Result<(), AppError> {
        let mut inner = self.write();
        let conversation = &mut inner.entry_mut(id)?.conversation;
        conversation.metadata.updated_at = reply.timestamp.max(conversation.metadata.updated_at);
        conversation.messages.push(user);
        conversation.messages.push(reply);
        Ok(())
    }

    async fn open_turn(&self, id: Option<&str>, model: &str) -> Result<OpenTurn, AppError> {
        let mut inner = self.write();
        let (conversation_id, created) = match id {
            Some(id) => (inner.entry_mut(id)?.conversation.id.clone(), false),
            None => (inner.insert_new(model, self.capacity), true),
        };
        inner.entry_mut(&conversation_id)?.in_flight += 1;
        Ok(OpenTurn { conversation_id, created })
    }

    async fn close_turn(&self, id: &str) -> Result<(), AppError> {
        if let Some(entry) = self.write().conversations.get_mut(id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
        Ok(())
    }

    async fn set_user_email(&self, id: &str, email: &str) -> Result<(), AppError> {
        let email = email.trim();
        let mut inner = self.write();
        let metadata = &mut inner.entry_mut(id)?.conversation.metadata;
        if metadata.user_email.is_none() && !email.is_empty() {
            metadata.user_email = Some(email.to_string());
        }
        Ok(())
    }

    async fn set_model(&self, id: &str, model: &str) -> Result<(), AppError> {
        let mut inner = self.write();
        inner.entry_mut(id)?.conversation.metadata.model = model.to_string();
        Ok(())
    }

    async fn mark_ended(&self, id: &str) -> Result<(), AppError> {
        let mut inner = self.write();
        inner.entry_mut(id)?.conversation.metadata.ended_at = Some(Utc::now());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.write().conversations.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, AppError> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.conversations.values().collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries
            .into_iter()
            .map(|e| ConversationSummary {
                conversation_id: e.conversation.id.clone(),
                message_count: e.conversation.messages.len(),
                last_message: e.conversation.messages.last().cloned(),
                metadata: e.conversation.metadata.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::models::MessageRole;

    #[tokio::test]
    async fn create_initializes_metadata() {
        let store = InMemoryConversationStore::new();
        let id = store.create("llama").await.unwrap();
        let conv = store.get(&id).await.unwrap();
        assert!(conv.messages.is_empty());
        assert_eq!(conv.metadata.model, "llama");
        assert!(conv.metadata.user_email.is_none());
        assert!(conv.metadata.ended_at.is_none());
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = InMemoryConversationStore::new();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(store.create("m").await.unwrap()));
        }
    }

    #[tokio::test]
    async fn appends_keep_call_order() {
        let store = InMemoryConversationStore::new();
        let id = store.create("m").await.unwrap();
        for i in 0..10 {
            let msg = if i % 2 == 0 {
                Message::user(format!("u{i}"))
            } else {
                Message::assistant(format!("a{i}"))
            };
            store.append(&id, msg).await.unwrap();
        }
        let conv = store.get(&id).await.unwrap();
        let contents: Vec<&str> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["u0", "a1", "u2", "a3", "u4", "a5", "u6", "a7", "u8", "a9"]);
        assert_eq!(conv.messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn append_to_unknown_id_is_not_found() {
        let store = InMemoryConversationStore::new();
        let err = store.append("missing", Message::user("hi")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_email_wins() {
        let store = InMemoryConversationStore::new();
        let id = store.create("m").await.unwrap();
        store.set_user_email(&id, "  ").await.unwrap();
        assert!(store.get(&id).await.unwrap().metadata.user_email.is_none());
        store.set_user_email(&id, "first@example.com").await.unwrap();
        store.set_user_email(&id, "second@example.com").await.unwrap();
        assert_eq!(
            store.get(&id).await.unwrap().metadata.user_email.as_deref(),
            Some("first@example.com")
        );
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryConversationStore::new();
        let id = store.create("m").await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_is_in_creation_order_with_last_message() {
        let store = InMemoryConversationStore::new();
        let a = store.create("m").await.unwrap();
        let b = store.create("m").await.unwrap();
        store.append(&b, Message::user("later")).await.unwrap();
        store.append(&a, Message::user("first")).await.unwrap();
        store.append(&a, Message::assistant("reply")).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_id, a);
        assert_eq!(list[0].message_count, 2);
        assert_eq!(list[0].last_message.as_ref().unwrap().content, "reply");
        assert_eq!(list[1].conversation_id, b);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_active() {
        let store = InMemoryConversationStore::with_capacity(2);
        let a = store.create("m").await.unwrap();
        let b = store.create("m").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append(&a, Message::user("keep me")).await.unwrap();

        let c = store.create("m").await.unwrap();
        assert!(store.get(&a).await.is_ok());
        assert!(store.get(&b).await.unwrap_err().is_not_found());
        assert!(store.get(&c).await.is_ok());
    }

    #[tokio::test]
    async fn append_turn_adds_user_then_reply() {
        let store = InMemoryConversationStore::new();
        let id = store.create("m").await.unwrap();
        store.append_turn(&id, Message::user("q"), Message::assistant("a")).await.unwrap();
        let conv = store.get(&id).await.unwrap();
        let roles: Vec<MessageRole> = conv.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
        assert!(store
            .append_turn("missing", Message::user("q"), Message::assistant("a"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn open_turn_resolves_or_creates() {
        let store = InMemoryConversationStore::new();
        let fresh = store.open_turn(None, "m").await.unwrap();
        assert!(fresh.created);
        let again = store.open_turn(Some(&fresh.conversation_id), "m").await.unwrap();
        let expected = OpenTurn { conversation_id: fresh.conversation_id.clone(), created: false };
        assert_eq!(again, expected);

        assert!(store.open_turn(Some("unknown"), "m").await.unwrap_err().is_not_found());
        assert_eq!(store.list().await.unwrap().len(), 1);
        store.close_turn("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn conversations_with_open_turns_are_not_evicted() {
        let store = InMemoryConversationStore::with_capacity(1);
        let busy = store.open_turn(None, "m").await.unwrap().conversation_id;

        let other = store.create("m").await.unwrap();
        assert!(store.get(&busy).await.is_ok());
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.close_turn(&busy).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append(&other, Message::user("recent")).await.unwrap();
        let third = store.create("m").await.unwrap();
        assert!(store.get(&busy).await.unwrap_err().is_not_found());
        assert!(store.get(&third).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let store = Arc::new(InMemoryConversationStore::new());
        let id = store.create("m").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.append(&id, Message::user(format!("{i}"))).await.unwrap();
                store.create("m").await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get(&id).await.unwrap().messages.len(), 32);
        assert_eq!(store.list().await.unwrap().len(), 33);
    }
}
