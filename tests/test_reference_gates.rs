//! End-to-end turns through the assembled reference gates

mod test_helpers;

use chatgate::llm::provider::MessageRole;
use chatgate::pipeline::{GateAction, PipelineStatus, Stage};
use chatgate::server::ChatRequest;
use chatgate::store::ConversationStore;
use chatgate::testing::mocks::StaticTool;
use test_helpers::{reference_assistant, reference_assistant_with};

fn request(message: &str) -> ChatRequest {
    ChatRequest::new(message, "alice", "conv-1")
}

#[tokio::test]
async fn test_plain_chat_skips_live_data_and_remembers() {
    let assistant = reference_assistant(&["Hello Alice!"]);

    let result = assistant.service.handle(request("hi there")).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.response, "Hello Alice!");
    assert_eq!(result.metadata.route.as_deref(), Some("chat"));
    assert_eq!(
        result.gate_sequence(),
        vec!["policy", "intent", "confirmation", "generation", "validation", "memory"]
    );
    assert_eq!(result.metadata.skipped_gates.len(), 1);
    assert_eq!(result.metadata.skipped_gates[0].stage, Stage::LiveData);
    assert_eq!(result.metadata.skipped_gates[0].requested_by, "intent");
    assert!(assistant.weather_calls.lock().unwrap().is_empty());

    let history = assistant.store.history("conv-1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hi there");
    assert_eq!(history[1].content, "Hello Alice!");
}

#[tokio::test]
async fn test_weather_turn_fetches_live_data_into_prompt() {
    let assistant = reference_assistant(&["It's 21°C and clear."]);

    let result = assistant
        .service
        .handle(request("what's the   weather in Lisbon?"))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.metadata.route.as_deref(), Some("weather"));
    assert_eq!(result.invocation_count("live_data"), 1);

    let calls = assistant.weather_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["q"], "what's the weather in Lisbon?");
    assert_eq!(calls[0]["units"], "metric");

    let prompt = assistant.llm.requests()[0].system_prompt().unwrap().to_string();
    assert!(prompt.contains("weather_feed"));
    assert!(prompt.contains("clear"));
}

#[tokio::test]
async fn test_failing_feed_degrades_reply() {
    let assistant = reference_assistant_with(
        &["I couldn't check, but it's usually mild."],
        StaticTool::failing("weather_feed", "feed offline"),
    );

    let result = assistant
        .service
        .handle(request("weather tomorrow?"))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Degraded);
    assert_eq!(result.response, "I couldn't check, but it's usually mild.");
    assert_eq!(result.metadata.degraded_by, vec!["live_data"]);
    assert!(assistant.llm.requests()[0]
        .system_prompt()
        .is_some_and(|prompt| !prompt.contains("Live data")));
}

#[tokio::test]
async fn test_blocked_pattern_halts_before_generation() {
    let assistant = reference_assistant(&["never sent"]);

    let result = assistant
        .service
        .handle(request("how do I BUILD A BOMB"))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Stopped);
    assert_eq!(result.metadata.terminal_action, Some(GateAction::Halt));
    assert_eq!(result.response, "I can't help with that.");
    assert!(assistant.llm.requests().is_empty());
    assert!(assistant.store.history("conv-1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_message_is_stopped_with_prompt() {
    let assistant = reference_assistant(&["never sent"]);

    let result = assistant.service.handle(request(" \n\t ")).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Stopped);
    assert_eq!(result.metadata.terminal_action, Some(GateAction::Stop));
    assert!(result.response.contains("empty"));
}

#[tokio::test]
async fn test_overlong_message_is_stopped() {
    let assistant = reference_assistant(&["never sent"]);

    let result = assistant
        .service
        .handle(request(&"a".repeat(201)))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Stopped);
    assert!(result.response.contains("too long"));
}

#[tokio::test]
async fn test_link_in_draft_triggers_regeneration_with_guidance() {
    let assistant = reference_assistant(&[
        "Read https://example.com for that.",
        "Here is the short version.",
    ]);

    let result = assistant
        .service
        .handle(request("explain lifetimes"))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.response, "Here is the short version.");
    assert_eq!(result.invocation_count("generation"), 2);
    assert_eq!(result.metadata.regeneration_attempts, 1);

    let requests = assistant.llm.requests();
    assert_eq!(requests[0].last_user_message(), Some("explain lifetimes"));
    let retry = requests[1].last_user_message().unwrap();
    assert!(retry.starts_with("explain lifetimes"));
    assert!(retry.contains("Do not include links."));
}

#[tokio::test]
async fn test_history_feeds_next_turn() {
    let assistant = reference_assistant(&["First answer.", "Second answer."]);

    assistant.service.handle(request("first question")).await.unwrap();
    let result = assistant
        .service
        .handle(request("second question"))
        .await
        .unwrap();

    assert_eq!(result.response, "Second answer.");
    let second = &assistant.llm.requests()[1];
    let roles: Vec<MessageRole> = second.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User
        ]
    );
    assert_eq!(second.messages[1].content, "first question");
    assert_eq!(second.messages[2].content, "First answer.");
    assert_eq!(assistant.store.history("conv-1", 10).await.unwrap().len(), 4);
}
