//! Per-request pipeline state
//!
//! One `PipelineState` lives for exactly one request. Gates receive it by
//! shared reference; only the orchestrator and regeneration controller mutate
//! it, and the audit trail (`gate_results`) is append-only.

use crate::pipeline::gate::{GateAction, GateResult, GateStatus, Signal};
use crate::pipeline::registry::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// A request for live data from an external tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Live data fetched earlier in the pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveData {
    pub source: String,
    pub data: Value,
}

/// An action that needs explicit user confirmation before it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub action: String,
    pub summary: String,
}

/// Flags accumulated from gate signals and orchestrator bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineFlags {
    pub regeneration_attempt: u32,
    pub regeneration_exhausted: bool,
    pub fix_guidance: Option<String>,
    /// Set while a generation attempt carries fix guidance
    pub constitutional_fix: bool,
    pub route: Option<String>,
    pub external_tool: Option<ToolRequest>,
    pub live_data: Option<LiveData>,
    pub confirmation: Option<ConfirmationRequest>,
    /// Stages requested to be skipped, keyed to the requesting gate
    pub skip_stages: BTreeMap<Stage, String>,
    /// Gates requested to be skipped, keyed to the requesting gate
    pub skip_gates: BTreeMap<String, String>,
    pub soft_failures: Vec<String>,
    pub degraded_by: Vec<String>,
    pub extra: BTreeMap<String, Value>,
}

impl PipelineFlags {
    /// Whether any gate degraded the result
    pub fn is_degraded(&self) -> bool {
        !self.degraded_by.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Fold one signal into the flags
    ///
    /// `FixGuidance` and `AckRequired` are consumed directly by the
    /// regeneration controller and the orchestrator and leave the flags alone.
    pub(crate) fn apply(&mut self, signal: &Signal, source: &str) {
        match signal {
            Signal::SkipStage { stage } => {
                self.skip_stages
                    .entry(*stage)
                    .or_insert_with(|| source.to_string());
            }
            Signal::SkipGate { gate_id } => {
                self.skip_gates
                    .entry(gate_id.clone())
                    .or_insert_with(|| source.to_string());
            }
            Signal::Route { route } => self.route = Some(route.clone()),
            Signal::ExternalTool(request) => self.external_tool = Some(request.clone()),
            Signal::LiveData { source, data } => {
                self.live_data = Some(LiveData {
                    source: source.clone(),
                    data: data.clone(),
                })
            }
            Signal::ConfirmationRequired { action, summary } => {
                self.confirmation = Some(ConfirmationRequest {
                    action: action.clone(),
                    summary: summary.clone(),
                })
            }
            Signal::SetFlag { key, value } => {
                self.extra.insert(key.clone(), value.clone());
            }
            Signal::FixGuidance { .. } | Signal::AckRequired { .. } => {}
        }
    }

    fn note(list: &mut Vec<String>, gate_id: &str) {
        if !list.iter().any(|existing| existing == gate_id) {
            list.push(gate_id.to_string());
        }
    }
}

/// One generation attempt inside the regeneration loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub effective_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_guidance: Option<String>,
}

/// A gate that was not invoked because a routing signal asked for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedGate {
    pub gate_id: String,
    pub stage: Stage,
    pub requested_by: String,
}

/// Wall-clock marks for each gate invocation
#[derive(Debug, Clone, Serialize)]
pub struct PipelineTimestamps {
    pub started_at: DateTime<Utc>,
    pub marks: Vec<StageMark>,
    #[serde(skip)]
    started: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMark {
    pub stage: Stage,
    pub gate_id: String,
    pub completed_at: DateTime<Utc>,
}

impl PipelineTimestamps {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            marks: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Mutable per-request record shared by all gates
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub(crate) user_message: String,
    pub(crate) normalized_input: String,
    pub(crate) effective_message: Option<String>,
    pub(crate) gate_results: Vec<GateResult>,
    pub(crate) flags: PipelineFlags,
    pub(crate) generation: Option<String>,
    pub(crate) validated_output: Option<String>,
    pub(crate) attempts: Vec<AttemptRecord>,
    pub(crate) skipped: Vec<SkippedGate>,
    pub(crate) timestamps: PipelineTimestamps,
}

impl PipelineState {
    pub fn new(user_message: impl Into<String>) -> Self {
        let user_message = user_message.into();
        let normalized_input = normalize_input(&user_message);
        Self {
            user_message,
            normalized_input,
            effective_message: None,
            gate_results: Vec::new(),
            flags: PipelineFlags::default(),
            generation: None,
            validated_output: None,
            attempts: Vec::new(),
            skipped: Vec::new(),
            timestamps: PipelineTimestamps::start(),
        }
    }

    /// The message exactly as the user sent it
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn normalized_input(&self) -> &str {
        &self.normalized_input
    }

    /// Message the current generation attempt should answer
    ///
    /// Falls back to the original message outside the regeneration loop.
    pub fn effective_message(&self) -> &str {
        self.effective_message
            .as_deref()
            .unwrap_or(&self.user_message)
    }

    pub fn gate_results(&self) -> &[GateResult] {
        &self.gate_results
    }

    /// Most recent result recorded for `gate_id`
    pub fn latest(&self, gate_id: &str) -> Option<&GateResult> {
        self.gate_results
            .iter()
            .rev()
            .find(|result| result.gate_id() == gate_id)
    }

    pub fn invocations(&self, gate_id: &str) -> usize {
        self.gate_results
            .iter()
            .filter(|result| result.gate_id() == gate_id)
            .count()
    }

    pub fn flags(&self) -> &PipelineFlags {
        &self.flags
    }

    /// Latest generation draft
    pub fn generation(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    pub fn validated_output(&self) -> Option<&str> {
        self.validated_output.as_deref()
    }

    /// Best reply available so far: validated output, else the latest draft
    pub fn reply(&self) -> Option<&str> {
        self.validated_output
            .as_deref()
            .or(self.generation.as_deref())
            .filter(|text| !text.trim().is_empty())
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn skipped(&self) -> &[SkippedGate] {
        &self.skipped
    }

    pub fn timestamps(&self) -> &PipelineTimestamps {
        &self.timestamps
    }

    /// Append a gate result and fold its signals into the flags
    pub(crate) fn record(&mut self, stage: Stage, result: GateResult) {
        let gate_id = result.gate_id().to_string();
        for signal in &result.output().signals {
            self.flags.apply(signal, &gate_id);
        }
        if result.status() == GateStatus::SoftFail {
            PipelineFlags::note(&mut self.flags.soft_failures, &gate_id);
        }
        if result.action() == GateAction::Degrade {
            PipelineFlags::note(&mut self.flags.degraded_by, &gate_id);
        }
        self.timestamps.marks.push(StageMark {
            stage,
            gate_id,
            completed_at: Utc::now(),
        });
        self.gate_results.push(result);
    }

    pub(crate) fn mark_skipped(&mut self, stage: Stage, gate_id: &str, requested_by: &str) {
        self.skipped.push(SkippedGate {
            gate_id: gate_id.to_string(),
            stage,
            requested_by: requested_by.to_string(),
        });
    }

    pub(crate) fn mark_degraded(&mut self, source: &str) {
        PipelineFlags::note(&mut self.flags.degraded_by, source);
    }

    /// Start a generation attempt with the given effective message
    pub(crate) fn begin_attempt(&mut self, attempt: u32, effective_message: String) {
        let fix_guidance = self.flags.fix_guidance.clone();
        self.flags.regeneration_attempt = attempt;
        self.flags.constitutional_fix = fix_guidance.is_some();
        self.attempts.push(AttemptRecord {
            attempt,
            effective_message: effective_message.clone(),
            fix_guidance,
        });
        self.effective_message = Some(effective_message);
    }

    pub(crate) fn set_fix_guidance(&mut self, guidance: Option<String>) {
        self.flags.fix_guidance = guidance;
    }

    pub(crate) fn set_regeneration_exhausted(&mut self) {
        self.flags.regeneration_exhausted = true;
    }

    pub(crate) fn set_generation(&mut self, draft: String) {
        self.generation = Some(draft);
    }

    pub(crate) fn set_validated_output(&mut self, output: String) {
        self.validated_output = Some(output);
    }
}

/// Trim the message and collapse inner whitespace runs to a single space
pub fn normalize_input(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}
