//! Stage ordering, gate registration and the skip routing table

use crate::pipeline::gate::Gate;
use crate::pipeline::orchestrator::PipelineError;
use crate::pipeline::state::PipelineState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Named position in the fixed execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Policy,
    LiveData,
    Generation,
    Validation,
    Memory,
}

impl Stage {
    /// Canonical execution order
    pub const ORDER: [Stage; 5] = [
        Stage::Policy,
        Stage::LiveData,
        Stage::Generation,
        Stage::Validation,
        Stage::Memory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Policy => "policy",
            Stage::LiveData => "live_data",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
            Stage::Memory => "memory",
        }
    }

    /// Generation always runs; every other stage may be routed around
    pub fn is_skippable(self) -> bool {
        self != Stage::Generation
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The gates registered for one assistant, in stage order
#[derive(Clone)]
pub struct GateSet {
    policy: Vec<Arc<dyn Gate>>,
    live_data: Option<Arc<dyn Gate>>,
    generation: Arc<dyn Gate>,
    validation: Option<Arc<dyn Gate>>,
    memory: Option<Arc<dyn Gate>>,
}

impl GateSet {
    pub fn builder() -> GateSetBuilder {
        GateSetBuilder::default()
    }

    /// Every registered gate paired with its stage, in execution order
    pub fn ordered(&self) -> Vec<(Stage, Arc<dyn Gate>)> {
        let mut ordered: Vec<(Stage, Arc<dyn Gate>)> = self
            .policy
            .iter()
            .map(|gate| (Stage::Policy, Arc::clone(gate)))
            .collect();
        if let Some(gate) = &self.live_data {
            ordered.push((Stage::LiveData, Arc::clone(gate)));
        }
        ordered.push((Stage::Generation, Arc::clone(&self.generation)));
        if let Some(gate) = &self.validation {
            ordered.push((Stage::Validation, Arc::clone(gate)));
        }
        if let Some(gate) = &self.memory {
            ordered.push((Stage::Memory, Arc::clone(gate)));
        }
        ordered
    }

    pub fn generation(&self) -> &Arc<dyn Gate> {
        &self.generation
    }

    pub fn validation(&self) -> Option<&Arc<dyn Gate>> {
        self.validation.as_ref()
    }

    pub fn gate_ids(&self) -> Vec<String> {
        self.ordered()
            .iter()
            .map(|(_, gate)| gate.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ordered().len()
    }

    /// Always false for a set returned by the builder, which requires a
    /// generation gate
    pub fn is_empty(&self) -> bool {
        self.ordered().is_empty()
    }
}

impl fmt::Debug for GateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self
            .ordered()
            .iter()
            .map(|(stage, gate)| format!("{}:{}", stage, gate.id()))
            .collect();
        f.debug_struct("GateSet").field("gates", &stages).finish()
    }
}

#[derive(Default)]
pub struct GateSetBuilder {
    policy: Vec<Arc<dyn Gate>>,
    live_data: Option<Arc<dyn Gate>>,
    generation: Option<Arc<dyn Gate>>,
    validation: Option<Arc<dyn Gate>>,
    memory: Option<Arc<dyn Gate>>,
}

impl GateSetBuilder {
    /// Append a policy gate; policy gates run in registration order
    pub fn policy(mut self, gate: Arc<dyn Gate>) -> Self {
        self.policy.push(gate);
        self
    }

    pub fn live_data(mut self, gate: Arc<dyn Gate>) -> Self {
        self.live_data = Some(gate);
        self
    }

    pub fn generation(mut self, gate: Arc<dyn Gate>) -> Self {
        self.generation = Some(gate);
        self
    }

    pub fn validation(mut self, gate: Arc<dyn Gate>) -> Self {
        self.validation = Some(gate);
        self
    }

    pub fn memory(mut self, gate: Arc<dyn Gate>) -> Self {
        self.memory = Some(gate);
        self
    }

    pub fn build(self) -> Result<GateSet, PipelineError> {
        let generation = self.generation.ok_or(PipelineError::MissingGenerationGate)?;
        let set = GateSet {
            policy: self.policy,
            live_data: self.live_data,
            generation,
            validation: self.validation,
            memory: self.memory,
        };

        let mut seen = HashSet::new();
        for (_, gate) in set.ordered() {
            let id = gate.id();
            if id.trim().is_empty() {
                return Err(PipelineError::EmptyGateId);
            }
            if !seen.insert(id.to_string()) {
                return Err(PipelineError::DuplicateGateId(id.to_string()));
            }
        }

        Ok(set)
    }
}

/// Gate id that asked for `gate_id` (or its whole stage) to be skipped
///
/// Returns `None` for the generation stage regardless of signals.
pub fn skip_requested<'s>(state: &'s PipelineState, stage: Stage, gate_id: &str) -> Option<&'s str> {
    if !stage.is_skippable() {
        return None;
    }
    let flags = state.flags();
    flags
        .skip_gates
        .get(gate_id)
        .or_else(|| flags.skip_stages.get(&stage))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::gate::{GateOutput, GateResult, Signal};
    use crate::testing::mocks::ScriptedGate;

    fn gate(id: &str) -> Arc<dyn Gate> {
        Arc::new(ScriptedGate::passing(id))
    }

    #[test]
    fn test_stage_order() {
        let mut sorted = Stage::ORDER;
        sorted.sort();
        assert_eq!(sorted, Stage::ORDER);
        assert!(!Stage::Generation.is_skippable());
        assert!(Stage::Validation.is_skippable());
    }

    #[test]
    fn test_ordered_follows_stage_order() {
        let set = GateSet::builder()
            .memory(gate("memory"))
            .generation(gate("generation"))
            .policy(gate("policy"))
            .validation(gate("validation"))
            .policy(gate("intent"))
            .live_data(gate("live_data"))
            .build()
            .unwrap();

        assert_eq!(
            set.gate_ids(),
            vec![
                "policy",
                "intent",
                "live_data",
                "generation",
                "validation",
                "memory"
            ]
        );
        assert_eq!(set.len(), 6);
    }

    #[test]
    fn test_minimal_set_is_not_empty() {
        let set = GateSet::builder()
            .generation(gate("generation"))
            .build()
            .unwrap();
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_generation_is_mandatory() {
        let result = GateSet::builder().policy(gate("policy")).build();
        assert!(matches!(result, Err(PipelineError::MissingGenerationGate)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = GateSet::builder()
            .policy(gate("same"))
            .generation(gate("same"))
            .build();
        assert!(matches!(result, Err(PipelineError::DuplicateGateId(id)) if id == "same"));
    }

    #[test]
    fn test_skip_requested_by_stage_and_gate() {
        let mut state = PipelineState::new("hi");
        let output = GateOutput::empty()
            .with_signal(Signal::SkipStage {
                stage: Stage::LiveData,
            })
            .with_signal(Signal::SkipGate {
                gate_id: "memory".to_string(),
            })
            .with_signal(Signal::SkipStage {
                stage: Stage::Generation,
            });
        state.record(Stage::Policy, GateResult::pass("intent", output));

        assert_eq!(
            skip_requested(&state, Stage::LiveData, "live_data"),
            Some("intent")
        );
        assert_eq!(skip_requested(&state, Stage::Memory, "memory"), Some("intent"));
        assert_eq!(skip_requested(&state, Stage::Generation, "generation"), None);
        assert_eq!(skip_requested(&state, Stage::Validation, "validation"), None);
    }
}
