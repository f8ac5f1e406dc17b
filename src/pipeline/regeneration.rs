//! Bounded generate/validate loop
//!
//! Generation and validation are driven together. When validation answers
//! `regenerate`, generation runs again with the validator's fix guidance
//! appended to the original message, up to `max_regenerations` extra times.
//! When the budget runs out the last draft is accepted (fail-open).

use crate::observability::metrics;
use crate::pipeline::gate::Gate;
use crate::pipeline::invoke::{classify, Flow, GateInvoker, Termination};
use crate::pipeline::registry::{skip_requested, Stage};
use crate::pipeline::state::PipelineState;
use tracing::{debug, info, warn};

/// How the generate/validate loop ended
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RegenerationOutcome {
    /// Validation accepted a draft after `regenerations` extra attempts
    Accepted { regenerations: u32 },
    /// Validation kept asking for regeneration; the last draft was kept
    Exhausted { regenerations: u32 },
    Terminated(Termination),
}

/// Drives generation and validation for one request
#[derive(Debug, Clone, Copy)]
pub struct RegenerationController {
    max_regenerations: u32,
}

impl RegenerationController {
    pub fn new(max_regenerations: u32) -> Self {
        Self { max_regenerations }
    }

    pub fn max_regenerations(&self) -> u32 {
        self.max_regenerations
    }

    /// Upper bound on generation invocations for one request
    pub fn max_generation_attempts(&self) -> u32 {
        self.max_regenerations.saturating_add(1)
    }

    pub(crate) async fn run(
        &self,
        generation: &dyn Gate,
        validation: Option<&dyn Gate>,
        state: &mut PipelineState,
        invoker: &GateInvoker<'_>,
    ) -> RegenerationOutcome {
        let mut attempt: u32 = 0;

        loop {
            let effective =
                compose_effective_message(state.user_message(), state.flags().fix_guidance.as_deref());
            state.begin_attempt(attempt, effective);
            debug!(attempt, "Starting generation attempt");

            let result = invoker.invoke(generation, Stage::Generation, state).await;
            let draft = result
                .output()
                .text
                .clone()
                .filter(|text| !text.trim().is_empty());
            let flow = classify(&result);
            state.record(Stage::Generation, result);

            match flow {
                Flow::Proceed => {}
                Flow::Terminate(termination) => return RegenerationOutcome::Terminated(termination),
                Flow::Regenerate => {
                    return RegenerationOutcome::Terminated(Termination::Failed {
                        gate_id: generation.id().to_string(),
                        action: None,
                        reason: "generation gate cannot request regeneration".to_string(),
                    })
                }
            }

            let Some(draft) = draft else {
                return RegenerationOutcome::Terminated(Termination::Failed {
                    gate_id: generation.id().to_string(),
                    action: None,
                    reason: "generation gate produced no draft".to_string(),
                });
            };
            state.set_generation(draft.clone());

            let Some(validation) = validation else {
                state.set_validated_output(draft);
                return RegenerationOutcome::Accepted {
                    regenerations: attempt,
                };
            };
            if let Some(requested_by) =
                skip_requested(state, Stage::Validation, validation.id()).map(str::to_string)
            {
                info!(gate_id = %validation.id(), requested_by = %requested_by, "Skipping validation");
                state.mark_skipped(Stage::Validation, validation.id(), &requested_by);
                state.set_validated_output(draft);
                return RegenerationOutcome::Accepted {
                    regenerations: attempt,
                };
            }

            let result = invoker.invoke(validation, Stage::Validation, state).await;
            let revised = result
                .output()
                .text
                .clone()
                .filter(|text| !text.trim().is_empty());
            let guidance = result
                .output()
                .fix_guidance()
                .map(str::trim)
                .filter(|guidance| !guidance.is_empty())
                .map(str::to_string);
            let flow = classify(&result);
            state.record(Stage::Validation, result);

            match flow {
                Flow::Proceed => {
                    state.set_validated_output(revised.unwrap_or(draft));
                    return RegenerationOutcome::Accepted {
                        regenerations: attempt,
                    };
                }
                Flow::Terminate(termination) => return RegenerationOutcome::Terminated(termination),
                Flow::Regenerate if attempt >= self.max_regenerations => {
                    metrics().regeneration_exhausted();
                    warn!(
                        attempts = attempt + 1,
                        max_regenerations = self.max_regenerations,
                        "Regeneration budget exhausted, accepting last draft"
                    );
                    state.set_regeneration_exhausted();
                    state.set_validated_output(draft);
                    return RegenerationOutcome::Exhausted {
                        regenerations: attempt,
                    };
                }
                Flow::Regenerate => {
                    attempt += 1;
                    metrics().regeneration_requested();
                    info!(
                        attempt,
                        has_guidance = guidance.is_some(),
                        "Validation requested regeneration"
                    );
                    state.set_fix_guidance(guidance);
                }
            }
        }
    }
}

/// Original message with fix guidance appended
///
/// Blank or missing guidance leaves the message unmodified.
pub fn compose_effective_message(original: &str, guidance: Option<&str>) -> String {
    match guidance.map(str::trim).filter(|guidance| !guidance.is_empty()) {
        Some(guidance) => format!(
            "{original}\n\n[Revision guidance: address the following in your reply]\n{guidance}"
        ),
        None => original.to_string(),
    }
}
