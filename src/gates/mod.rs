//! Reference gates for a chat turn
//!
//! | stage      | gate                                  |
//! |------------|---------------------------------------|
//! | policy     | `policy`, `intent`, `confirmation`    |
//! | live data  | `live_data`                           |
//! | generation | `generation`                          |
//! | validation | `validation`                          |
//! | memory     | `memory`                              |

pub mod confirmation;
pub mod generation;
pub mod intent;
pub mod live_data;
pub mod memory;
pub mod policy;
pub mod validation;

pub use confirmation::{ConfirmationGate, ACKNOWLEDGED_ACTION_KEY};
pub use generation::GenerationGate;
pub use intent::IntentGate;
pub use live_data::LiveDataGate;
pub use memory::MemoryGate;
pub use policy::PolicyGate;
pub use validation::ValidationGate;

use crate::config::AssistantConfig;
use crate::error::AssistantResult;
use crate::llm::provider::LlmProvider;
use crate::pipeline::GateSet;
use crate::store::{AckLedger, ConversationStore};
use crate::tools::ToolSystem;
use std::sync::Arc;

/// Shared services the reference gates are built on
#[derive(Clone)]
pub struct GateDependencies {
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolSystem>,
    pub store: Arc<dyn ConversationStore>,
    pub ledger: Arc<AckLedger>,
}

/// Build the standard gate set from configuration
pub fn assemble_gate_set(
    config: &AssistantConfig,
    deps: GateDependencies,
) -> AssistantResult<GateSet> {
    let gates = GateSet::builder()
        .policy(Arc::new(PolicyGate::new(&config.policy)?))
        .policy(Arc::new(IntentGate::new(&config.intent)?))
        .policy(Arc::new(ConfirmationGate::new(deps.ledger)))
        .live_data(Arc::new(LiveDataGate::new(deps.tools)))
        .generation(Arc::new(GenerationGate::new(
            deps.llm,
            &config.llm,
            &config.memory,
        )))
        .validation(Arc::new(ValidationGate::new(&config.validation)?))
        .memory(Arc::new(MemoryGate::new(deps.store)))
        .build()?;

    Ok(gates)
}
