//! Test helpers and utilities for integration tests

use chatgate::pipeline::{
    GateSet, GateSetBuilder, PipelineContext, PipelineOrchestrator, PipelineResult,
    PipelineSettings,
};
use chatgate::testing::mocks::{Journal, ScriptedGate};
use std::sync::Arc;

/// Context for a fresh request from a test user
#[allow(dead_code)]
pub fn test_context() -> PipelineContext {
    PipelineContext::new("test-user", "test-conversation")
}

/// A journaled gate that lets the request through
#[allow(dead_code)]
pub fn journaled(id: &str, journal: &Journal) -> Arc<ScriptedGate> {
    Arc::new(ScriptedGate::passing(id).with_journal(journal.clone()))
}

/// Builder pre-loaded with a generation gate producing `draft`
#[allow(dead_code)]
pub fn with_generation(draft: &str) -> GateSetBuilder {
    GateSet::builder().generation(Arc::new(ScriptedGate::drafts("generation", [draft])))
}

/// Run `gates` once with default settings
#[allow(dead_code)]
pub async fn run(gates: GateSet, message: &str) -> PipelineResult {
    run_with(gates, PipelineSettings::default(), message).await
}

#[allow(dead_code)]
pub async fn run_with(
    gates: GateSet,
    settings: PipelineSettings,
    message: &str,
) -> PipelineResult {
    PipelineOrchestrator::new(gates, settings)
        .run(message, &test_context())
        .await
}

/// Minimal valid TOML configuration
#[allow(dead_code)]
pub const MINIMAL_CONFIG: &str = r#"
[assistant]
id = "test-assistant"

[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
api_key_env = "ANTHROPIC_API_KEY"
system_prompt = "You are a helpful assistant."
"#;

/// Configuration exercising every reference gate
#[allow(dead_code)]
pub const REFERENCE_CONFIG: &str = r#"
[assistant]
id = "reference-assistant"

[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
api_key_env = "ANTHROPIC_API_KEY"
system_prompt = "You are a helpful assistant."

[pipeline]
max_regenerations = 2

[policy]
max_message_chars = 200
blocked_patterns = ["(?i)build a bomb"]

[intent]
default_route = "chat"

[[intent.rules]]
name = "cancel_order"
pattern = "(?i)cancel .*order"
confirm = true
summary = "Cancel your most recent order?"

[[intent.rules]]
name = "weather"
pattern = "(?i)weather"
tool = "weather_feed"
parameters = { q = "{message}", units = "metric" }

[tools]
weather_feed = "builtin"

[validation]
max_response_chars = 120

[[validation.rules]]
id = "no_urls"
pattern = "https?://"
guidance = "Do not include links."

[memory]
history_window = 10
"#;

/// A chat service over the reference gates with mocked collaborators
#[allow(dead_code)]
pub struct ReferenceAssistant {
    pub service: chatgate::server::ChatService,
    pub llm: Arc<chatgate::testing::mocks::MockLlmProvider>,
    pub store: Arc<chatgate::store::InMemoryConversationStore>,
    pub ledger: Arc<chatgate::store::AckLedger>,
    pub weather_calls: Arc<std::sync::Mutex<Vec<serde_json::Value>>>,
}

#[allow(dead_code)]
pub fn reference_assistant(replies: &[&str]) -> ReferenceAssistant {
    reference_assistant_with(
        replies,
        chatgate::testing::mocks::StaticTool::returning(
            "weather_feed",
            serde_json::json!({ "temp_c": 21, "sky": "clear" }),
        ),
    )
}

#[allow(dead_code)]
pub fn reference_assistant_with(
    replies: &[&str],
    weather: chatgate::testing::mocks::StaticTool,
) -> ReferenceAssistant {
    use chatgate::config::AssistantConfig;
    use chatgate::gates::{assemble_gate_set, GateDependencies};
    use chatgate::server::ChatService;
    use chatgate::store::{AckLedger, InMemoryConversationStore};
    use chatgate::testing::mocks::MockLlmProvider;
    use chatgate::tools::ToolSystem;
    use std::time::Duration;

    let config = AssistantConfig::from_toml_str(REFERENCE_CONFIG).unwrap();
    let llm = Arc::new(MockLlmProvider::new(
        replies.iter().map(|reply| reply.to_string()).collect(),
    ));
    let weather_calls = weather.calls();
    let mut tools = ToolSystem::new();
    tools.register("weather_feed", Box::new(weather));
    let store = Arc::new(InMemoryConversationStore::new(config.memory.max_turns));
    let ledger = Arc::new(AckLedger::new(Duration::from_secs(config.intent.ack_ttl_secs)));

    let gates = assemble_gate_set(
        &config,
        GateDependencies {
            llm: llm.clone(),
            tools: Arc::new(tools),
            store: store.clone(),
            ledger: ledger.clone(),
        },
    )
    .unwrap();
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        gates,
        PipelineSettings::from(&config.pipeline),
    ));
    let service = ChatService::new(orchestrator, store.clone(), ledger.clone())
        .with_history_window(config.memory.history_window);

    ReferenceAssistant {
        service,
        llm,
        store,
        ledger,
        weather_calls,
    }
}
