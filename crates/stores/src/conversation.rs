//! In-memory conversation store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use kindred_core::error::StoreError;
use kindred_core::message::{ConversationId, ConversationStore, Message};

/// A conversation store that keeps messages in a Vec per conversation.
/// Useful for testing and sessions where persistence isn't needed.
pub struct InMemoryConversations {
    conversations: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryConversations {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversations {
    async fn append(
        &self,
        conversation: &ConversationId,
        mut message: Message,
    ) -> std::result::Result<Message, StoreError> {
        // The store owns identity: any provisional ID is replaced.
        message.id = Uuid::new_v4().to_string();

        let mut conversations = self.conversations.write().await;
        let messages = conversations.entry(conversation.clone()).or_default();
        messages.push(message.clone());
        Ok(message)
    }

    async fn recent(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, StoreError> {
        let conversations = self.conversations.read().await;
        let Some(messages) = conversations.get(conversation) else {
            return Ok(Vec::new());
        };

        let live: Vec<&Message> = messages.iter().filter(|m| !m.deleted).collect();
        let skip = live.len().saturating_sub(limit);
        Ok(live.into_iter().skip(skip).cloned().collect())
    }

    async fn soft_delete(
        &self,
        conversation: &ConversationId,
        message_id: &str,
    ) -> std::result::Result<bool, StoreError> {
        let mut conversations = self.conversations.write().await;
        let Some(messages) = conversations.get_mut(conversation) else {
            return Ok(false);
        };

        match messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
