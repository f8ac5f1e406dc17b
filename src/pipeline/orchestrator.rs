//! Pipeline orchestrator
//!
//! Runs the registered gates in stage order for one request, interprets each
//! gate's action, hands the generation/validation pair to the regeneration
//! controller, and assembles the final [`PipelineResult`].

use crate::config::{
    default_ack_message, default_error_message, default_stopped_message, ExhaustionPolicy,
    PipelineSection,
};
use crate::error::sanitize_error_message;
use crate::observability::metrics;
use crate::pipeline::cancellation::CancellationSignal;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::gate::{GateAction, GateStatus};
use crate::pipeline::invoke::{classify, Flow, GateInvoker, Termination, CANCELLED_PREFIX};
use crate::pipeline::regeneration::{RegenerationController, RegenerationOutcome};
use crate::pipeline::registry::{skip_requested, GateSet, Stage};
use crate::pipeline::result::{PipelineResult, PipelineStatus, ResultMetadata};
use crate::pipeline::state::PipelineState;
use crate::pipeline_span;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

/// Settles the run metrics when a run future is dropped mid-flight,
/// e.g. when the HTTP client disconnects
struct RunGuard {
    armed: bool,
}

impl RunGuard {
    fn arm() -> Self {
        Self { armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.armed {
            metrics().run_abandoned();
            warn!("Pipeline run dropped before completion");
        }
    }
}

/// Source recorded in `degraded_by` when regeneration runs out under the degrade policy
pub const REGENERATION_SOURCE: &str = "regeneration";

/// Errors raised while assembling a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A generation gate is required")]
    MissingGenerationGate,

    #[error("Duplicate gate id: {0}")]
    DuplicateGateId(String),

    #[error("Gate id must not be empty")]
    EmptyGateId,
}

/// Runtime knobs for the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub max_regenerations: u32,
    pub on_exhaustion: ExhaustionPolicy,
    pub gate_timeout: Option<Duration>,
    /// Shown when a gate stops the pipeline without its own message
    pub stopped_message: String,
    /// Shown for every `error` outcome; internal detail never reaches the user
    pub error_message: String,
    /// Shown when an acknowledgment gate supplies no message
    pub ack_message: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl From<&PipelineSection> for PipelineSettings {
    fn from(section: &PipelineSection) -> Self {
        Self {
            max_regenerations: section.max_regenerations,
            on_exhaustion: section.on_exhaustion,
            gate_timeout: section.gate_timeout_ms.map(Duration::from_millis),
            stopped_message: non_blank(Some(section.stopped_message.clone()))
                .unwrap_or_else(default_stopped_message),
            error_message: non_blank(Some(section.error_message.clone()))
                .unwrap_or_else(default_error_message),
            ack_message: default_ack_message(),
        }
    }
}

impl PipelineSettings {
    pub fn with_max_regenerations(mut self, max_regenerations: u32) -> Self {
        self.max_regenerations = max_regenerations;
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhaustion = policy;
        self
    }

    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = Some(timeout);
        self
    }
}

/// Executes a [`GateSet`] for individual requests
///
/// The orchestrator holds no per-request state; one instance serves many
/// concurrent requests.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    gates: GateSet,
    settings: PipelineSettings,
    regeneration: RegenerationController,
}

impl PipelineOrchestrator {
    pub fn new(gates: GateSet, settings: PipelineSettings) -> Self {
        let regeneration = RegenerationController::new(settings.max_regenerations);
        Self {
            gates,
            settings,
            regeneration,
        }
    }

    pub fn gates(&self) -> &GateSet {
        &self.gates
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the pipeline without an external cancellation source
    pub async fn run(&self, message: &str, ctx: &PipelineContext) -> PipelineResult {
        self.run_with_cancellation(message, ctx, CancellationSignal::never())
            .await
    }

    /// Run the pipeline, aborting the in-flight gate when `cancel` fires
    pub async fn run_with_cancellation(
        &self,
        message: &str,
        ctx: &PipelineContext,
        cancel: CancellationSignal,
    ) -> PipelineResult {
        let span = pipeline_span!(
            request_id = %ctx.request_id,
            conversation_id = %ctx.conversation_id,
            user_id = %ctx.user_id
        );

        async move {
            metrics().run_started();
            let guard = RunGuard::arm();
            info!(gates = self.gates.len(), "Pipeline run started");

            let mut state = PipelineState::new(message);
            let termination = self.drive(&mut state, ctx, &cancel).await;
            let result = self.assemble(state, ctx, termination);
            guard.disarm();

            metrics().run_finished(
                result.status,
                Duration::from_millis(result.metadata.total_time_ms),
            );
            info!(
                status = %result.status,
                gate_invocations = result.metadata.gate_invocations,
                regenerations = result.metadata.regeneration_attempts,
                total_time_ms = result.metadata.total_time_ms,
                "Pipeline run finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        state: &mut PipelineState,
        ctx: &PipelineContext,
        cancel: &CancellationSignal,
    ) -> Option<Termination> {
        let invoker = GateInvoker::new(ctx, cancel, self.settings.gate_timeout);

        for (stage, gate) in self.gates.ordered() {
            // Validation only runs inside the regeneration controller
            if stage == Stage::Validation {
                continue;
            }

            if let Some(requested_by) = skip_requested(state, stage, gate.id()).map(str::to_string)
            {
                info!(gate_id = %gate.id(), stage = %stage, requested_by = %requested_by, "Skipping gate");
                state.mark_skipped(stage, gate.id(), &requested_by);
                continue;
            }

            if stage == Stage::Generation {
                if state.flags().skip_stages.contains_key(&Stage::Generation)
                    || state.flags().skip_gates.contains_key(gate.id())
                {
                    warn!(gate_id = %gate.id(), "Ignoring request to skip generation");
                }

                let validation = self.gates.validation().map(|validator| validator.as_ref());
                match self
                    .regeneration
                    .run(gate.as_ref(), validation, state, &invoker)
                    .await
                {
                    RegenerationOutcome::Accepted { regenerations } => {
                        debug!(regenerations, "Draft accepted by validation");
                    }
                    RegenerationOutcome::Exhausted { regenerations } => {
                        debug!(regenerations, "Keeping last draft after exhausting regenerations");
                        if self.settings.on_exhaustion == ExhaustionPolicy::Degrade {
                            state.mark_degraded(REGENERATION_SOURCE);
                        }
                    }
                    RegenerationOutcome::Terminated(termination) => return Some(termination),
                }
                continue;
            }

            let result = invoker.invoke(gate.as_ref(), stage, state).await;
            if result.status() == GateStatus::SoftFail {
                warn!(
                    gate_id = %result.gate_id(),
                    reason = result.failure_reason().unwrap_or_default(),
                    "Gate soft-failed, continuing"
                );
            }
            let flow = classify(&result);
            state.record(stage, result);

            match flow {
                Flow::Proceed => {}
                Flow::Terminate(termination) => return Some(termination),
                Flow::Regenerate => {
                    return Some(Termination::Failed {
                        gate_id: gate.id().to_string(),
                        action: Some(GateAction::Regenerate),
                        reason: format!(
                            "regenerate is only valid from the validation stage, got it from the {stage} stage"
                        ),
                    })
                }
            }
        }

        None
    }

    fn assemble(
        &self,
        state: PipelineState,
        ctx: &PipelineContext,
        termination: Option<Termination>,
    ) -> PipelineResult {
        let total_time_ms = state.timestamps().elapsed_ms();
        let reply = state.reply().map(str::to_string);
        let degraded = state.flags().is_degraded();

        let mut terminated_by = None;
        let mut terminal_action = None;
        let mut internal_error = None;
        let mut ack_token = None;
        let mut ack_message = None;

        let (status, response) = match termination {
            None => match reply {
                Some(reply) if degraded => (PipelineStatus::Degraded, reply),
                Some(reply) => (PipelineStatus::Success, reply),
                None => {
                    internal_error = Some("pipeline completed without a reply".to_string());
                    (PipelineStatus::Error, self.settings.error_message.clone())
                }
            },
            Some(Termination::Stopped {
                gate_id,
                action,
                message,
            }) => {
                info!(gate_id = %gate_id, action = %action, "Pipeline stopped by gate");
                terminated_by = Some(gate_id);
                terminal_action = Some(action);
                (
                    PipelineStatus::Stopped,
                    non_blank(message).unwrap_or_else(|| self.settings.stopped_message.clone()),
                )
            }
            Some(Termination::AwaitingAck {
                gate_id,
                token,
                message,
            }) => {
                info!(gate_id = %gate_id, "Pipeline awaiting acknowledgment");
                let message =
                    non_blank(Some(message)).unwrap_or_else(|| self.settings.ack_message.clone());
                terminated_by = Some(gate_id);
                terminal_action = Some(GateAction::AwaitAck);
                ack_token = Some(token);
                ack_message = Some(message.clone());
                (PipelineStatus::AwaitAck, message)
            }
            Some(Termination::Failed {
                gate_id,
                action,
                reason,
            }) => {
                if reason.starts_with(CANCELLED_PREFIX) {
                    metrics().run_cancelled();
                }
                error!(gate_id = %gate_id, reason = %reason, "Pipeline failed");
                terminated_by = Some(gate_id);
                terminal_action = action;
                internal_error = Some(sanitize_error_message(&reason));
                (PipelineStatus::Error, self.settings.error_message.clone())
            }
        };

        let PipelineState {
            gate_results,
            flags,
            attempts,
            skipped,
            timestamps,
            ..
        } = state;

        let metadata = ResultMetadata {
            request_id: ctx.request_id,
            started_at: timestamps.started_at,
            total_time_ms,
            gate_time_ms: gate_results
                .iter()
                .map(|result| result.execution_time_ms())
                .sum(),
            gate_invocations: gate_results.len(),
            regeneration_attempts: flags.regeneration_attempt,
            regeneration_exhausted: flags.regeneration_exhausted,
            attempts,
            skipped_gates: skipped,
            soft_failures: flags.soft_failures,
            degraded_by: flags.degraded_by,
            route: flags.route,
            terminated_by,
            terminal_action,
            error: internal_error,
        };

        PipelineResult {
            status,
            response,
            ack_token,
            ack_message,
            gate_results,
            metadata,
        }
    }
}

/// Run `gates` once for `message`
///
/// Convenience entry point for callers that do not keep an orchestrator around.
pub async fn run_pipeline(
    message: &str,
    ctx: &PipelineContext,
    gates: &GateSet,
    settings: &PipelineSettings,
) -> PipelineResult {
    PipelineOrchestrator::new(gates.clone(), settings.clone())
        .run(message, ctx)
        .await
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.filter(|text| !text.trim().is_empty())
}
