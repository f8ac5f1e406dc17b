//! Conversation history persistence

use crate::pipeline::context::ConversationTurn;
use crate::store::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Storage for per-conversation turn history
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append turns to the end of a conversation
    async fn append(
        &self,
        conversation_id: &str,
        turns: Vec<ConversationTurn>,
    ) -> Result<(), StoreError>;

    /// The last `limit` turns, oldest first
    async fn history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;
}

/// Process-local store that keeps at most `max_turns` per conversation
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
    max_turns: usize,
}

impl InMemoryConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.lock().await.len()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(200)
    }
}

fn check_id(conversation_id: &str) -> Result<(), StoreError> {
    if conversation_id.trim().is_empty() {
        return Err(StoreError::InvalidConversation(
            "conversation id must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(
        &self,
        conversation_id: &str,
        turns: Vec<ConversationTurn>,
    ) -> Result<(), StoreError> {
        check_id(conversation_id)?;

        let mut conversations = self.conversations.lock().await;
        let history = conversations
            .entry(conversation_id.to_string())
            .or_default();
        history.extend(turns);
        while history.len() > self.max_turns {
            history.pop_front();
        }
        Ok(())
    }

    async fn history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        check_id(conversation_id)?;

        let conversations = self.conversations.lock().await;
        let Some(history) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let skip = history.len().saturating_sub(limit);
        Ok(history.iter().skip(skip).cloned().collect())
    }
}
