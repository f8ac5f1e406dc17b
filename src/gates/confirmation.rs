//! Acknowledgment gate
//!
//! Holds back any turn that an intent rule marked as needing confirmation
//! until the client presents a valid token for that action.

use crate::pipeline::{Gate, GateError, GateOutput, GateResult, PipelineContext, PipelineState};
use crate::store::AckLedger;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Context metadata key carrying the action a redeemed token confirmed
pub const ACKNOWLEDGED_ACTION_KEY: &str = "acknowledged_action";

pub struct ConfirmationGate {
    ledger: Arc<AckLedger>,
}

impl ConfirmationGate {
    pub const ID: &'static str = "confirmation";

    pub fn new(ledger: Arc<AckLedger>) -> Self {
        Self { ledger }
    }
}

/// A valid token only covers the action it was issued for
fn acknowledged(ctx: &PipelineContext, action: &str) -> bool {
    if !ctx.ack_token_valid {
        return false;
    }
    match ctx.metadata.get(ACKNOWLEDGED_ACTION_KEY).and_then(Value::as_str) {
        Some(acknowledged) => acknowledged == action,
        None => true,
    }
}

#[async_trait]
impl Gate for ConfirmationGate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        let Some(confirmation) = &state.flags().confirmation else {
            return Ok(GateResult::proceed(Self::ID));
        };

        if acknowledged(ctx, &confirmation.action) {
            return Ok(GateResult::pass(
                Self::ID,
                GateOutput::empty().with_data(json!({ "acknowledged": confirmation.action })),
            ));
        }

        let token = self.ledger.issue(&ctx.user_id, &confirmation.action).await;
        info!(action = %confirmation.action, "Awaiting user acknowledgment");
        Ok(GateResult::await_ack(
            Self::ID,
            token,
            confirmation.summary.clone(),
        ))
    }
}
