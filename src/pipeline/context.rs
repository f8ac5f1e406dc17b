//! Read-only request context visible to every gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// A prior exchange in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Identity, history and acknowledgment data for one request
///
/// Built once before the pipeline starts and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    pub request_id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub conversation_id: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    /// Set by the caller after verifying `ack_token` against the ledger
    #[serde(default)]
    pub ack_token_valid: bool,
    #[serde(default)]
    pub ack_token: Option<String>,
    #[serde(default)]
    pub requested_stance: Option<String>,
    #[serde(default)]
    pub action_source: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl PipelineContext {
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: None,
            conversation_id: conversation_id.into(),
            conversation_history: Vec::new(),
            ack_token_valid: false,
            ack_token: None,
            requested_stance: None,
            action_source: None,
            metadata: HashMap::new(),
            timezone: None,
            locale: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.conversation_history = history;
        self
    }

    /// Attach an acknowledgment token and whether the caller verified it
    pub fn with_acknowledgment(mut self, token: impl Into<String>, valid: bool) -> Self {
        self.ack_token = Some(token.into());
        self.ack_token_valid = valid;
        self
    }

    pub fn with_stance(mut self, stance: impl Into<String>) -> Self {
        self.requested_stance = Some(stance.into());
        self
    }

    pub fn with_action_source(mut self, source: impl Into<String>) -> Self {
        self.action_source = Some(source.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The last `limit` turns of history, oldest first
    pub fn recent_history(&self, limit: usize) -> &[ConversationTurn] {
        let start = self.conversation_history.len().saturating_sub(limit);
        &self.conversation_history[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_sets_fields() {
        let ctx = PipelineContext::new("user-1", "conv-1")
            .with_session("sess")
            .with_acknowledgment("ack_abc", true)
            .with_stance("concise")
            .with_locale("en-GB")
            .with_timezone("Europe/London")
            .with_metadata("channel", json!("web"));

        assert_eq!(ctx.user_id, "user-1");
        assert_eq!(ctx.conversation_id, "conv-1");
        assert_eq!(ctx.session_id.as_deref(), Some("sess"));
        assert!(ctx.ack_token_valid);
        assert_eq!(ctx.ack_token.as_deref(), Some("ack_abc"));
        assert_eq!(ctx.requested_stance.as_deref(), Some("concise"));
        assert_eq!(ctx.metadata.get("channel"), Some(&json!("web")));
    }

    #[test]
    fn test_recent_history_window() {
        let history = (0..5)
            .map(|i| ConversationTurn::user(format!("turn {i}")))
            .collect();
        let ctx = PipelineContext::new("u", "c").with_history(history);

        let recent = ctx.recent_history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "turn 3");
        assert_eq!(recent[1].content, "turn 4");
        assert_eq!(ctx.recent_history(50).len(), 5);
        assert!(ctx.recent_history(0).is_empty());
    }
}
