//! Live-data stage: runs the tool the intent gate asked for

use crate::pipeline::{
    Gate, GateError, GateOutput, GateResult, PipelineContext, PipelineState, Signal,
};
use crate::tools::ToolSystem;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub struct LiveDataGate {
    tools: Arc<ToolSystem>,
}

impl LiveDataGate {
    pub const ID: &'static str = "live_data";

    pub fn new(tools: Arc<ToolSystem>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Gate for LiveDataGate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        _ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        let Some(request) = &state.flags().external_tool else {
            return Ok(GateResult::proceed(Self::ID));
        };

        match self
            .tools
            .execute_tool(&request.tool, &request.parameters)
            .await
        {
            Ok(data) => Ok(GateResult::pass(
                Self::ID,
                GateOutput::empty()
                    .with_signal(Signal::LiveData {
                        source: request.tool.clone(),
                        data,
                    })
                    .with_data(json!({ "tool": request.tool })),
            )),
            Err(e) => {
                // Answer without live data rather than failing the turn
                warn!(tool = %request.tool, error = %e, "Live data unavailable");
                Ok(GateResult::soft_fail_degraded(
                    Self::ID,
                    format!("live data unavailable: {e}"),
                    GateOutput::empty().with_data(json!({ "tool": request.tool })),
                ))
            }
        }
    }
}
