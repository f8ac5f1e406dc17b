//! Shared request-independent state: conversation history and acknowledgment tokens

pub mod ack;
pub mod conversation;

pub use ack::{AckLedger, AckRedemption};
pub use conversation::{ConversationStore, InMemoryConversationStore};

use thiserror::Error;

/// Errors raised by conversation persistence
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Conversation store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid conversation id: {0}")]
    InvalidConversation(String),
}
