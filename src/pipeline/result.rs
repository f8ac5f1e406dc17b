//! Final outcome of one pipeline run

use crate::pipeline::gate::{GateAction, GateResult};
use crate::pipeline::state::{AttemptRecord, SkippedGate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Overall status reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Stopped,
    AwaitAck,
    Degraded,
    Error,
}

impl PipelineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Success => "success",
            PipelineStatus::Stopped => "stopped",
            PipelineStatus::AwaitAck => "await_ack",
            PipelineStatus::Degraded => "degraded",
            PipelineStatus::Error => "error",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing, routing and regeneration bookkeeping for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total_time_ms: u64,
    /// Sum of the individual gate execution times
    pub gate_time_ms: u64,
    pub gate_invocations: usize,
    pub regeneration_attempts: u32,
    pub regeneration_exhausted: bool,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub skipped_gates: Vec<SkippedGate>,
    #[serde(default)]
    pub soft_failures: Vec<String>,
    #[serde(default)]
    pub degraded_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Gate whose action ended the run early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_action: Option<GateAction>,
    /// Sanitized internal reason for an `error` status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the caller gets back from a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    /// Never empty
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_message: Option<String>,
    pub gate_results: Vec<GateResult>,
    pub metadata: ResultMetadata,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// Whether the caller received a generated reply
    pub fn has_reply(&self) -> bool {
        matches!(
            self.status,
            PipelineStatus::Success | PipelineStatus::Degraded
        )
    }

    /// All audit entries for one gate, in invocation order
    pub fn entries_for<'a>(&'a self, gate_id: &'a str) -> impl Iterator<Item = &'a GateResult> + 'a {
        self.gate_results
            .iter()
            .filter(move |result| result.gate_id() == gate_id)
    }

    pub fn invocation_count(&self, gate_id: &str) -> usize {
        self.entries_for(gate_id).count()
    }

    /// Gate ids in invocation order
    pub fn gate_sequence(&self) -> Vec<&str> {
        self.gate_results
            .iter()
            .map(|result| result.gate_id())
            .collect()
    }
}
