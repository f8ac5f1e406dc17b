//! Mock implementations for testing
//!
//! Scripted gates, a canned LLM provider, a static tool and a broken
//! conversation store, so pipelines can be exercised without network access.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::pipeline::context::{ConversationTurn, PipelineContext};
use crate::pipeline::gate::{Gate, GateError, GateOutput, GateResult};
use crate::pipeline::state::PipelineState;
use crate::store::{ConversationStore, StoreError};
use crate::tools::{Tool, ToolDescription, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared record of gate ids in invocation order
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// What a [`ScriptedGate`] does on one invocation
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(GateResult),
    Fail(String),
    Panic(String),
}

/// Gate that replays a fixed script; the last step repeats once exhausted
pub struct ScriptedGate {
    id: String,
    steps: Vec<ScriptStep>,
    delay: Option<Duration>,
    journal: Option<Journal>,
    calls: Mutex<usize>,
    seen_messages: Mutex<Vec<String>>,
}

impl ScriptedGate {
    /// A gate with an empty script; it proceeds until steps are added
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            delay: None,
            journal: None,
            calls: Mutex::new(0),
            seen_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn passing(id: impl Into<String>) -> Self {
        let id = id.into();
        let result = GateResult::proceed(id.clone());
        Self::new(id).then(ScriptStep::Respond(result))
    }

    pub fn responding(id: impl Into<String>, result: GateResult) -> Self {
        Self::new(id).then(ScriptStep::Respond(result))
    }

    /// A generation gate producing each draft in turn
    pub fn drafts<I, S>(id: impl Into<String>, drafts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let mut gate = Self::new(id.clone());
        for draft in drafts {
            gate = gate.then(ScriptStep::Respond(GateResult::pass(
                id.clone(),
                GateOutput::text(draft),
            )));
        }
        gate
    }

    pub fn then(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or_default()
    }

    /// `state.effective_message()` as seen by each invocation
    pub fn effective_messages(&self) -> Vec<String> {
        self.seen_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let mut calls = self.calls.lock().ok()?;
        let index = (*calls).min(self.steps.len().saturating_sub(1));
        *calls += 1;
        self.steps.get(index).cloned()
    }
}

#[async_trait]
impl Gate for ScriptedGate {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        _ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        if let Some(journal) = &self.journal {
            if let Ok(mut entries) = journal.lock() {
                entries.push(self.id.clone());
            }
        }
        if let Ok(mut seen) = self.seen_messages.lock() {
            seen.push(state.effective_message().to_string());
        }

        let step = self.next_step();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match step {
            None => Ok(GateResult::proceed(self.id.clone())),
            Some(ScriptStep::Respond(result)) => Ok(result),
            Some(ScriptStep::Fail(message)) => Err(GateError::internal(message)),
            Some(ScriptStep::Panic(message)) => panic!("{message}"),
        }
    }
}

/// Mock LLM provider cycling through canned responses
pub struct MockLlmProvider {
    responses: Vec<String>,
    finish_reason: FinishReason,
    failure: Option<LlmError>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            finish_reason: FinishReason::Stop,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub fn with_failure() -> Self {
        Self::failing(LlmError::RequestFailed("Mock LLM failure".to_string()))
    }

    pub fn failing(error: LlmError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let index = match self.requests.lock() {
            Ok(mut requests) => {
                requests.push(request.clone());
                requests.len() - 1
            }
            Err(_) => 0,
        };

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[index % self.responses.len()].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: request.model,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: self.finish_reason,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Tool returning a fixed value (or failing), recording its parameters
pub struct StaticTool {
    name: String,
    result: Result<Value, String>,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl StaticTool {
    pub fn returning(name: impl Into<String>, result: Value) -> Self {
        Self {
            name: name.into(),
            result: Ok(result),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Err(message.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the recorded parameters, usable after the tool is boxed
    pub fn calls(&self) -> Arc<Mutex<Vec<Value>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: self.name.clone(),
            description: "Static test tool".to_string(),
            parameters: json!({"type": "object"}),
        }
    }

    async fn initialize(&mut self, _config: Option<&Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(parameters.clone());
        }
        self.result
            .clone()
            .map_err(ToolError::ExecutionError)
    }
}

/// Conversation store that is always unavailable
#[derive(Debug, Default)]
pub struct FailingConversationStore;

#[async_trait]
impl ConversationStore for FailingConversationStore {
    async fn append(
        &self,
        _conversation_id: &str,
        _turns: Vec<ConversationTurn>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn history(
        &self,
        _conversation_id: &str,
        _limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }
}
