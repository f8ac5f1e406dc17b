//! Single gate invocation and classification of its result
//!
//! Every fault path (gate error, panic, timeout, cancellation, inconsistent
//! result) is converted here into a `hard_fail` / `stop` result so the rest of
//! the pipeline only ever sees well-formed results.

use crate::gate_span;
use crate::observability::metrics;
use crate::pipeline::cancellation::CancellationSignal;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::gate::{
    Gate, GateAction, GateContractError, GateError, GateResult, GateStatus,
};
use crate::pipeline::registry::Stage;
use crate::pipeline::state::PipelineState;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn, Instrument};

/// Prefix of the failure reason recorded when a run is cancelled
pub const CANCELLED_PREFIX: &str = "cancelled: ";

/// Why the pipeline ended before completing every stage
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Termination {
    Stopped {
        gate_id: String,
        action: GateAction,
        message: Option<String>,
    },
    AwaitingAck {
        gate_id: String,
        token: String,
        message: String,
    },
    Failed {
        gate_id: String,
        action: Option<GateAction>,
        reason: String,
    },
}

/// What the orchestrator should do after a result is recorded
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Flow {
    Proceed,
    Regenerate,
    Terminate(Termination),
}

/// Map a well-formed result onto the control flow it requests
pub(crate) fn classify(result: &GateResult) -> Flow {
    let gate_id = result.gate_id().to_string();

    if result.status() == GateStatus::HardFail {
        return Flow::Terminate(Termination::Failed {
            gate_id,
            action: Some(result.action()),
            reason: result
                .failure_reason()
                .unwrap_or("hard failure")
                .to_string(),
        });
    }

    match result.action() {
        GateAction::Continue | GateAction::Degrade => Flow::Proceed,
        GateAction::Regenerate => Flow::Regenerate,
        GateAction::Stop | GateAction::Halt => Flow::Terminate(Termination::Stopped {
            gate_id,
            action: result.action(),
            message: result.output().text.clone(),
        }),
        GateAction::AwaitAck => match result.output().ack_request() {
            Some((token, message)) if !token.trim().is_empty() => {
                Flow::Terminate(Termination::AwaitingAck {
                    gate_id,
                    token: token.to_string(),
                    message: message.to_string(),
                })
            }
            _ => Flow::Terminate(Termination::Failed {
                gate_id,
                action: Some(GateAction::AwaitAck),
                reason: "await_ack result carried no acknowledgment token".to_string(),
            }),
        },
    }
}

enum Outcome {
    Finished(std::thread::Result<Result<GateResult, GateError>>),
    TimedOut(Duration),
    Cancelled(String),
}

/// Invokes gates with the request's context, deadline and cancellation signal
pub(crate) struct GateInvoker<'a> {
    ctx: &'a PipelineContext,
    cancel: &'a CancellationSignal,
    timeout: Option<Duration>,
}

impl<'a> GateInvoker<'a> {
    pub(crate) fn new(
        ctx: &'a PipelineContext,
        cancel: &'a CancellationSignal,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx,
            cancel,
            timeout,
        }
    }

    /// Evaluate one gate and return a timed, contract-checked result
    pub(crate) async fn invoke(
        &self,
        gate: &dyn Gate,
        stage: Stage,
        state: &PipelineState,
    ) -> GateResult {
        let gate_id = gate.id().to_string();
        let span = gate_span!(gate_id = %gate_id, stage = %stage);
        let started = Instant::now();

        let result = async {
            if let Some(reason) = self.cancel.reason() {
                return cancelled(&gate_id, &reason);
            }

            let outcome = tokio::select! {
                biased;
                reason = self.cancel.cancelled() => Outcome::Cancelled(reason),
                outcome = self.evaluate(gate, state) => outcome,
            };
            self.settle(&gate_id, outcome)
        }
        .instrument(span)
        .await;

        let elapsed = started.elapsed();
        metrics().gate_evaluated(&gate_id, result.status(), elapsed);
        debug!(
            gate_id = %gate_id,
            stage = %stage,
            status = %result.status(),
            action = %result.action(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Gate evaluated"
        );

        result
            .with_sanitized_reason()
            .with_execution_time(elapsed.as_millis() as u64)
    }

    async fn evaluate(&self, gate: &dyn Gate, state: &PipelineState) -> Outcome {
        let evaluation = AssertUnwindSafe(gate.evaluate(state, self.ctx)).catch_unwind();
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, evaluation).await {
                Ok(finished) => Outcome::Finished(finished),
                Err(_) => Outcome::TimedOut(limit),
            },
            None => Outcome::Finished(evaluation.await),
        }
    }

    fn settle(&self, gate_id: &str, outcome: Outcome) -> GateResult {
        match outcome {
            Outcome::Finished(Ok(Ok(result))) => match verify(gate_id, &result) {
                Ok(()) => result,
                Err(violation) => {
                    metrics().contract_violation();
                    error!(gate_id = %gate_id, error = %violation, "Gate violated the result contract");
                    GateResult::hard_fail(gate_id, violation.to_string())
                }
            },
            Outcome::Finished(Ok(Err(gate_error))) => {
                error!(gate_id = %gate_id, error = %gate_error, "Gate raised an error");
                GateResult::hard_fail(gate_id, gate_error.to_string())
            }
            Outcome::Finished(Err(payload)) => {
                metrics().gate_panicked();
                let message = panic_message(payload.as_ref());
                error!(gate_id = %gate_id, panic = %message, "Gate panicked");
                GateResult::hard_fail(gate_id, format!("gate panicked: {message}"))
            }
            Outcome::TimedOut(limit) => {
                metrics().gate_timed_out(gate_id);
                warn!(gate_id = %gate_id, timeout_ms = limit.as_millis() as u64, "Gate timed out");
                GateResult::hard_fail(
                    gate_id,
                    format!("gate timed out after {}ms", limit.as_millis()),
                )
            }
            Outcome::Cancelled(reason) => cancelled(gate_id, &reason),
        }
    }
}

fn verify(gate_id: &str, result: &GateResult) -> Result<(), GateContractError> {
    if result.gate_id() != gate_id {
        return Err(GateContractError::GateIdMismatch {
            expected: gate_id.to_string(),
            actual: result.gate_id().to_string(),
        });
    }
    result.check_contract()
}

fn cancelled(gate_id: &str, reason: &str) -> GateResult {
    warn!(gate_id = %gate_id, reason = %reason, "Gate invocation cancelled");
    GateResult::hard_fail(gate_id, format!("{CANCELLED_PREFIX}{reason}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
