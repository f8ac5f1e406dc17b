//! Memory: persist the exchange once a reply has been accepted

use crate::pipeline::{
    ConversationTurn, Gate, GateError, GateOutput, GateResult, PipelineContext, PipelineState,
};
use crate::store::ConversationStore;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub struct MemoryGate {
    store: Arc<dyn ConversationStore>,
}

impl MemoryGate {
    pub const ID: &'static str = "memory";

    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Gate for MemoryGate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        let Some(reply) = state.reply() else {
            return Ok(GateResult::soft_fail(
                Self::ID,
                "no reply to remember",
                GateOutput::empty(),
            ));
        };

        let turns = vec![
            ConversationTurn::user(state.user_message()),
            ConversationTurn::assistant(reply),
        ];

        // A lost turn must not cost the user their reply
        match self.store.append(&ctx.conversation_id, turns).await {
            Ok(()) => Ok(GateResult::pass(
                Self::ID,
                GateOutput::empty().with_data(json!({ "turns_appended": 2 })),
            )),
            Err(e) => {
                warn!(conversation_id = %ctx.conversation_id, error = %e, "Failed to save conversation turns");
                Ok(GateResult::soft_fail(
                    Self::ID,
                    format!("conversation not saved: {e}"),
                    GateOutput::empty(),
                ))
            }
        }
    }
}
