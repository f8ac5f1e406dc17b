//! chatgate - gate pipeline backend for a conversational assistant
//!
//! Every chat turn flows through an ordered set of gates:
//!
//! 1. **policy** gates screen the message and may stop, halt or ask the user
//!    to confirm an action
//! 2. a **live data** gate fetches external facts the reply depends on
//! 3. the **generation** gate drafts the reply with an LLM
//! 4. the **validation** gate checks the draft and can send it back for a
//!    bounded number of regenerations
//! 5. a **memory** gate records the exchange
//!
//! The [`pipeline`] module holds the orchestrator and the gate contract, and
//! [`gates`] holds the reference gates built from configuration.
//!
//! # Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use chatgate::pipeline::{
//!     Gate, GateError, GateOutput, GateResult, GateSet, PipelineContext, PipelineOrchestrator,
//!     PipelineSettings, PipelineState, PipelineStatus,
//! };
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Gate for Echo {
//!     fn id(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn evaluate(
//!         &self,
//!         state: &PipelineState,
//!         _ctx: &PipelineContext,
//!     ) -> Result<GateResult, GateError> {
//!         Ok(GateResult::pass("echo", GateOutput::text(state.effective_message())))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let gates = GateSet::builder().generation(Arc::new(Echo)).build().unwrap();
//! let orchestrator = PipelineOrchestrator::new(gates, PipelineSettings::default());
//!
//! let result = orchestrator
//!     .run("hello", &PipelineContext::new("user-1", "conv-1"))
//!     .await;
//! assert_eq!(result.status, PipelineStatus::Success);
//! assert_eq!(result.response, "hello");
//! # });
//! ```

pub mod config;
pub mod error;
pub mod gates;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod testing;
pub mod tools;

pub use config::*;
pub use error::{AssistantError, AssistantResult};
pub use gates::{assemble_gate_set, GateDependencies};
pub use pipeline::{
    Gate, GateAction, GateResult, GateSet, GateStatus, PipelineContext, PipelineOrchestrator,
    PipelineResult, PipelineSettings, PipelineStatus,
};
pub use server::{ChatRequest, ChatService};
pub use tools::{Tool, ToolDescription, ToolError, ToolSystem};
