//! Generation: drafts the reply with the configured LLM

use crate::config::{LlmSection, MemorySection};
use crate::llm::provider::{CompletionRequest, FinishReason, LlmProvider, Message};
use crate::pipeline::{
    Gate, GateError, GateOutput, GateResult, PipelineContext, PipelineState, TurnRole,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct GenerationGate {
    llm: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    history_window: usize,
}

impl GenerationGate {
    pub const ID: &'static str = "generation";

    pub fn new(llm: Arc<dyn LlmProvider>, section: &LlmSection, memory: &MemorySection) -> Self {
        Self {
            llm,
            model: section.model.clone(),
            system_prompt: section.system_prompt.clone(),
            temperature: section.temperature,
            max_tokens: section.max_tokens,
            history_window: memory.history_window,
        }
    }

    /// System prompt enriched with stance, locale and any live data
    fn system_message(&self, state: &PipelineState, ctx: &PipelineContext) -> String {
        let mut prompt = self.system_prompt.clone();

        if let Some(stance) = ctx.requested_stance.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("\n\nAdopt the following stance: {stance}"));
        }
        if let Some(locale) = &ctx.locale {
            prompt.push_str(&format!("\n\nReply in the user's locale: {locale}"));
        }
        if let Some(timezone) = &ctx.timezone {
            prompt.push_str(&format!("\n\nThe user's timezone is {timezone}."));
        }
        if let Some(live) = &state.flags().live_data {
            prompt.push_str(&format!(
                "\n\nLive data from {}:\n{}",
                live.source, live.data
            ));
        }

        prompt
    }

    fn build_messages(&self, state: &PipelineState, ctx: &PipelineContext) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_message(state, ctx))];
        messages.extend(ctx.recent_history(self.history_window).iter().map(|turn| {
            match turn.role {
                TurnRole::User => Message::user(turn.content.clone()),
                TurnRole::Assistant => Message::assistant(turn.content.clone()),
            }
        }));
        messages.push(Message::user(state.effective_message()));
        messages
    }
}

#[async_trait]
impl Gate for GenerationGate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        let request = CompletionRequest::new(self.model.clone(), self.build_messages(state, ctx))
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_metadata("request_id", ctx.request_id.to_string());

        let response = self.llm.complete(request).await?;
        debug!(
            provider = self.llm.name(),
            total_tokens = response.usage.total_tokens,
            finish_reason = ?response.finish_reason,
            "Completion received"
        );

        let draft = response.content.as_deref().map(str::trim).unwrap_or_default();
        if draft.is_empty() {
            return Ok(GateResult::hard_fail(
                Self::ID,
                "LLM returned an empty completion",
            ));
        }

        let data = json!({
            "model": response.model,
            "total_tokens": response.usage.total_tokens,
            "finish_reason": response.finish_reason,
        });
        let output = GateOutput::text(draft).with_data(data);

        match response.finish_reason {
            FinishReason::Length => {
                warn!("Completion truncated by token limit");
                Ok(GateResult::degrade(Self::ID, output))
            }
            FinishReason::ContentFilter => Ok(GateResult::hard_fail(
                Self::ID,
                "completion withheld by the provider's content filter",
            )),
            FinishReason::Error => {
                warn!("Provider reported an error finish; passing the draft as degraded");
                Ok(GateResult::degrade(Self::ID, output))
            }
            FinishReason::Stop => Ok(GateResult::pass(Self::ID, output)),
        }
    }
}
