//! Gate contract and the uniform result every gate returns
//!
//! A gate is one independently implemented stage of request processing. It
//! reads the request's [`PipelineState`] and [`PipelineContext`] and produces
//! exactly one [`GateResult`]. The orchestrator only ever branches on
//! [`GateResult::action`]; everything else is payload or audit data.

use crate::error::sanitize_error_message;
use crate::llm::provider::LlmError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::registry::Stage;
use crate::pipeline::state::{PipelineState, ToolRequest};
use crate::store::StoreError;
use crate::tools::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Outcome classification reported by a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Blocked,
    Awaiting,
    Warning,
    SoftFail,
    HardFail,
}

impl GateStatus {
    /// Whether `action` is a legal companion of this status
    pub fn permits(self, action: GateAction) -> bool {
        match self {
            GateStatus::Pass | GateStatus::Warning | GateStatus::SoftFail => matches!(
                action,
                GateAction::Continue | GateAction::Regenerate | GateAction::Degrade
            ),
            GateStatus::Blocked | GateStatus::HardFail => {
                matches!(action, GateAction::Stop | GateAction::Halt)
            }
            GateStatus::Awaiting => action == GateAction::AwaitAck,
        }
    }

    /// Statuses that must carry a failure reason
    pub fn requires_failure_reason(self) -> bool {
        matches!(
            self,
            GateStatus::Blocked | GateStatus::SoftFail | GateStatus::HardFail
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateStatus::Pass => "pass",
            GateStatus::Blocked => "blocked",
            GateStatus::Awaiting => "awaiting",
            GateStatus::Warning => "warning",
            GateStatus::SoftFail => "soft_fail",
            GateStatus::HardFail => "hard_fail",
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control-flow instruction a gate hands back to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Continue,
    Stop,
    Halt,
    AwaitAck,
    Regenerate,
    Degrade,
}

impl GateAction {
    /// Actions that end the pipeline pass
    pub fn is_terminal(self) -> bool {
        matches!(self, GateAction::Stop | GateAction::Halt | GateAction::AwaitAck)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateAction::Continue => "continue",
            GateAction::Stop => "stop",
            GateAction::Halt => "halt",
            GateAction::AwaitAck => "await_ack",
            GateAction::Regenerate => "regenerate",
            GateAction::Degrade => "degrade",
        }
    }
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known signals one gate leaves for the orchestrator or later gates
///
/// Each variant documents its consumer:
/// - `SkipStage` / `SkipGate`: routing table, before a gate is invoked
/// - `Route`, `ExternalTool`, `LiveData`, `ConfirmationRequired`, `SetFlag`:
///   copied into [`crate::pipeline::state::PipelineFlags`]
/// - `AckRequired`: the orchestrator's `await_ack` branch
/// - `FixGuidance`: the regeneration controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    SkipStage { stage: Stage },
    SkipGate { gate_id: String },
    Route { route: String },
    ExternalTool(ToolRequest),
    LiveData { source: String, data: Value },
    ConfirmationRequired { action: String, summary: String },
    AckRequired { token: String, message: String },
    FixGuidance { guidance: String },
    SetFlag { key: String, value: Value },
}

/// Payload carried by every built-in gate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateOutput {
    /// Reply text, draft, or the user-facing message for a stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<Signal>,
    /// Gate-specific data, opaque to the orchestrator
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl GateOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Fix guidance left by a validation gate, if any
    pub fn fix_guidance(&self) -> Option<&str> {
        self.signals.iter().find_map(|signal| match signal {
            Signal::FixGuidance { guidance } => Some(guidance.as_str()),
            _ => None,
        })
    }

    /// Acknowledgment token and message for an `await_ack` result
    pub fn ack_request(&self) -> Option<(&str, &str)> {
        self.signals.iter().find_map(|signal| match signal {
            Signal::AckRequired { token, message } => Some((token.as_str(), message.as_str())),
            _ => None,
        })
    }
}

/// Immutable record of exactly one gate invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult<T = GateOutput> {
    gate_id: String,
    status: GateStatus,
    action: GateAction,
    output: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    #[serde(default)]
    execution_time_ms: u64,
}

impl<T> GateResult<T> {
    /// Build a result, rejecting inconsistent status/action pairs
    pub fn new(
        gate_id: impl Into<String>,
        status: GateStatus,
        action: GateAction,
        output: T,
        failure_reason: Option<String>,
    ) -> Result<Self, GateContractError> {
        let result = Self {
            gate_id: gate_id.into(),
            status,
            action,
            output,
            failure_reason,
            execution_time_ms: 0,
        };
        result.check_contract()?;
        Ok(result)
    }

    pub fn gate_id(&self) -> &str {
        &self.gate_id
    }

    pub fn status(&self) -> GateStatus {
        self.status
    }

    pub fn action(&self) -> GateAction {
        self.action
    }

    pub fn output(&self) -> &T {
        &self.output
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms
    }

    pub fn into_output(self) -> T {
        self.output
    }

    pub fn map_output<U>(self, f: impl FnOnce(T) -> U) -> GateResult<U> {
        GateResult {
            gate_id: self.gate_id,
            status: self.status,
            action: self.action,
            output: f(self.output),
            failure_reason: self.failure_reason,
            execution_time_ms: self.execution_time_ms,
        }
    }

    /// Verify the status/action and failure-reason invariants
    pub fn check_contract(&self) -> Result<(), GateContractError> {
        if !self.status.permits(self.action) {
            return Err(GateContractError::InconsistentAction {
                gate_id: self.gate_id.clone(),
                status: self.status,
                action: self.action,
            });
        }
        let has_reason = self
            .failure_reason
            .as_deref()
            .is_some_and(|reason| !reason.trim().is_empty());
        match (self.status.requires_failure_reason(), has_reason) {
            (true, false) => Err(GateContractError::MissingFailureReason {
                gate_id: self.gate_id.clone(),
                status: self.status,
            }),
            (false, true) => Err(GateContractError::UnexpectedFailureReason {
                gate_id: self.gate_id.clone(),
                status: self.status,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn with_execution_time(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    /// Redact secrets from the failure reason before it is recorded
    pub(crate) fn with_sanitized_reason(mut self) -> Self {
        self.failure_reason = self
            .failure_reason
            .map(|reason| sanitize_error_message(&reason));
        self
    }
}

impl GateResult<GateOutput> {
    fn build(
        gate_id: impl Into<String>,
        status: GateStatus,
        action: GateAction,
        output: GateOutput,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            gate_id: gate_id.into(),
            status,
            action,
            output,
            failure_reason,
            execution_time_ms: 0,
        }
    }

    /// `pass` / `continue` with a payload
    pub fn pass(gate_id: impl Into<String>, output: GateOutput) -> Self {
        Self::build(gate_id, GateStatus::Pass, GateAction::Continue, output, None)
    }

    /// `pass` / `continue` with nothing to report
    pub fn proceed(gate_id: impl Into<String>) -> Self {
        Self::pass(gate_id, GateOutput::empty())
    }

    /// `warning` / `degrade`: usable output with reduced guarantees
    pub fn degrade(gate_id: impl Into<String>, output: GateOutput) -> Self {
        Self::build(gate_id, GateStatus::Warning, GateAction::Degrade, output, None)
    }

    /// `soft_fail` / `continue`: recoverable locally
    pub fn soft_fail(
        gate_id: impl Into<String>,
        reason: impl Into<String>,
        output: GateOutput,
    ) -> Self {
        Self::build(
            gate_id,
            GateStatus::SoftFail,
            GateAction::Continue,
            output,
            Some(reason.into()),
        )
    }

    /// `soft_fail` / `degrade`: the pipeline goes on without this gate's contribution
    pub fn soft_fail_degraded(
        gate_id: impl Into<String>,
        reason: impl Into<String>,
        output: GateOutput,
    ) -> Self {
        Self::build(
            gate_id,
            GateStatus::SoftFail,
            GateAction::Degrade,
            output,
            Some(reason.into()),
        )
    }

    /// `soft_fail` / `regenerate`, optionally carrying fix guidance
    pub fn regenerate(
        gate_id: impl Into<String>,
        reason: impl Into<String>,
        guidance: Option<String>,
    ) -> Self {
        let mut output = GateOutput::empty();
        if let Some(guidance) = guidance {
            output = output.with_signal(Signal::FixGuidance { guidance });
        }
        Self::build(
            gate_id,
            GateStatus::SoftFail,
            GateAction::Regenerate,
            output,
            Some(reason.into()),
        )
    }

    /// `blocked` / `stop` with the message shown to the user
    pub fn stop(
        gate_id: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::build(
            gate_id,
            GateStatus::Blocked,
            GateAction::Stop,
            GateOutput::text(message),
            Some(reason.into()),
        )
    }

    /// `blocked` / `halt`: a safety-critical rejection
    pub fn halt(
        gate_id: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::build(
            gate_id,
            GateStatus::Blocked,
            GateAction::Halt,
            GateOutput::text(message),
            Some(reason.into()),
        )
    }

    /// `awaiting` / `await_ack` with a freshly minted token
    pub fn await_ack(
        gate_id: impl Into<String>,
        token: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let output = GateOutput::text(message.clone()).with_signal(Signal::AckRequired {
            token: token.into(),
            message,
        });
        Self::build(
            gate_id,
            GateStatus::Awaiting,
            GateAction::AwaitAck,
            output,
            None,
        )
    }

    /// `hard_fail` / `stop`
    pub fn hard_fail(gate_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::build(
            gate_id,
            GateStatus::HardFail,
            GateAction::Stop,
            GateOutput::empty(),
            Some(reason.into()),
        )
    }
}

/// Violations of the gate result invariants
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateContractError {
    #[error("gate '{gate_id}' returned status {status} with incompatible action {action}")]
    InconsistentAction {
        gate_id: String,
        status: GateStatus,
        action: GateAction,
    },
    #[error("gate '{gate_id}' returned status {status} without a failure reason")]
    MissingFailureReason { gate_id: String, status: GateStatus },
    #[error("gate '{gate_id}' attached a failure reason to status {status}")]
    UnexpectedFailureReason { gate_id: String, status: GateStatus },
    #[error("gate '{expected}' returned a result labelled '{actual}'")]
    GateIdMismatch { expected: String, actual: String },
}

/// Faults a gate raises instead of returning a result
///
/// The orchestrator converts every one of these into `hard_fail` / `stop`.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// A unit of work in the pipeline
///
/// Implementations must not keep per-request state between invocations. The
/// same gate may be evaluated more than once per request only when the
/// regeneration controller re-invokes it.
#[async_trait]
pub trait Gate: Send + Sync {
    /// Stable identifier used in the audit trail and routing signals
    fn id(&self) -> &str;

    /// Evaluate the gate for the current request
    async fn evaluate(
        &self,
        state: &PipelineState,
        ctx: &PipelineContext,
    ) -> Result<GateResult, GateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_action_table() {
        assert!(GateStatus::Pass.permits(GateAction::Continue));
        assert!(GateStatus::Pass.permits(GateAction::Regenerate));
        assert!(GateStatus::Pass.permits(GateAction::Degrade));
        assert!(!GateStatus::Pass.permits(GateAction::Stop));
        assert!(!GateStatus::Pass.permits(GateAction::AwaitAck));

        assert!(GateStatus::HardFail.permits(GateAction::Stop));
        assert!(GateStatus::HardFail.permits(GateAction::Halt));
        assert!(!GateStatus::HardFail.permits(GateAction::Continue));

        assert!(GateStatus::Awaiting.permits(GateAction::AwaitAck));
        assert!(!GateStatus::Awaiting.permits(GateAction::Continue));

        assert!(GateStatus::SoftFail.permits(GateAction::Regenerate));
        assert!(!GateStatus::Blocked.permits(GateAction::Degrade));
    }

    #[test]
    fn test_new_rejects_inconsistent_pair() {
        let result = GateResult::new(
            "policy",
            GateStatus::HardFail,
            GateAction::Continue,
            GateOutput::empty(),
            Some("boom".to_string()),
        );
        assert!(matches!(
            result,
            Err(GateContractError::InconsistentAction { .. })
        ));
    }

    #[test]
    fn test_new_requires_failure_reason() {
        let result = GateResult::new(
            "policy",
            GateStatus::Blocked,
            GateAction::Stop,
            GateOutput::empty(),
            None,
        );
        assert!(matches!(
            result,
            Err(GateContractError::MissingFailureReason { .. })
        ));

        let blank = GateResult::new(
            "policy",
            GateStatus::SoftFail,
            GateAction::Continue,
            GateOutput::empty(),
            Some("   ".to_string()),
        );
        assert!(blank.is_err());
    }

    #[test]
    fn test_new_rejects_reason_on_pass() {
        let result = GateResult::new(
            "policy",
            GateStatus::Pass,
            GateAction::Continue,
            GateOutput::empty(),
            Some("why".to_string()),
        );
        assert!(matches!(
            result,
            Err(GateContractError::UnexpectedFailureReason { .. })
        ));
    }

    #[test]
    fn test_convenience_constructors_satisfy_contract() {
        let results = vec![
            GateResult::proceed("a"),
            GateResult::pass("a", GateOutput::text("hi")),
            GateResult::degrade("a", GateOutput::empty()),
            GateResult::soft_fail("a", "flaky", GateOutput::empty()),
            GateResult::soft_fail_degraded("a", "flaky", GateOutput::empty()),
            GateResult::regenerate("a", "rule", Some("fix it".to_string())),
            GateResult::regenerate("a", "rule", None),
            GateResult::stop("a", "empty", "Say something"),
            GateResult::halt("a", "unsafe", "No"),
            GateResult::await_ack("a", "tok", "Confirm?"),
            GateResult::hard_fail("a", "down"),
        ];

        for result in results {
            assert!(
                result.check_contract().is_ok(),
                "{:?} should satisfy the contract",
                result
            );
        }
    }

    #[test]
    fn test_output_accessors() {
        let regen = GateResult::regenerate("validation", "claims", Some("avoid X".to_string()));
        assert_eq!(regen.output().fix_guidance(), Some("avoid X"));

        let ack = GateResult::await_ack("confirm", "ack_123", "Please confirm");
        assert_eq!(ack.output().ack_request(), Some(("ack_123", "Please confirm")));
        assert_eq!(ack.output().text.as_deref(), Some("Please confirm"));
    }

    #[test]
    fn test_map_output_preserves_metadata() {
        let result = GateResult::pass("gen", GateOutput::text("draft")).with_execution_time(12);
        let mapped = result.map_output(|output| output.text.unwrap_or_default());

        assert_eq!(mapped.gate_id(), "gen");
        assert_eq!(mapped.execution_time_ms(), 12);
        assert_eq!(mapped.output(), "draft");
    }

    #[test]
    fn test_serialization_uses_snake_case() {
        let result = GateResult::await_ack("confirm", "t", "m");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "awaiting");
        assert_eq!(json["action"], "await_ack");
        assert_eq!(json["output"]["signals"][0]["signal"], "ack_required");
    }
}
