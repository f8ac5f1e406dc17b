//! Gate pipeline core
//!
//! A request flows through a fixed sequence of stages:
//!
//! ```text
//! policy* -> live_data? -> generation <-> validation? -> memory?
//! ```
//!
//! Each stage is a [`Gate`] returning a [`GateResult`]. The
//! [`PipelineOrchestrator`] interprets each result's action; generation and
//! validation are driven together by the [`RegenerationController`].

pub mod cancellation;
pub mod context;
pub mod gate;
mod invoke;
pub mod orchestrator;
pub mod regeneration;
pub mod registry;
pub mod result;
pub mod state;

pub use cancellation::{CancellationHandle, CancellationSignal};
pub use context::{ConversationTurn, PipelineContext, TurnRole};
pub use gate::{
    Gate, GateAction, GateContractError, GateError, GateOutput, GateResult, GateStatus, Signal,
};
pub use invoke::CANCELLED_PREFIX;
pub use orchestrator::{run_pipeline, PipelineError, PipelineOrchestrator, PipelineSettings};
pub use regeneration::{compose_effective_message, RegenerationController};
pub use registry::{GateSet, GateSetBuilder, Stage};
pub use result::{PipelineResult, PipelineStatus, ResultMetadata};
pub use state::{
    AttemptRecord, ConfirmationRequest, LiveData, PipelineFlags, PipelineState, SkippedGate,
    ToolRequest,
};
