//! Generate/validate loop: bounded retries, fix guidance and exhaustion policy

mod test_helpers;

use chatgate::config::ExhaustionPolicy;
use chatgate::pipeline::orchestrator::REGENERATION_SOURCE;
use chatgate::pipeline::{
    GateOutput, GateResult, GateSet, PipelineOrchestrator, PipelineSettings, PipelineStatus,
};
use chatgate::testing::mocks::{ScriptStep, ScriptedGate};
use proptest::prelude::*;
use std::sync::Arc;
use test_helpers::{run_with, test_context};

fn rejecting(times: usize, guidance: &str) -> ScriptedGate {
    let mut gate = ScriptedGate::new("validation");
    for _ in 0..times {
        gate = gate.then(ScriptStep::Respond(GateResult::regenerate(
            "validation",
            "draft rejected",
            Some(guidance.to_string()),
        )));
    }
    gate.then(ScriptStep::Respond(GateResult::proceed("validation")))
}

fn always_rejecting() -> ScriptedGate {
    ScriptedGate::responding(
        "validation",
        GateResult::regenerate("validation", "never good enough", Some("Try again.".into())),
    )
}

#[tokio::test]
async fn test_single_regeneration_uses_guidance() {
    let generation = Arc::new(ScriptedGate::drafts("generation", ["draft A", "draft B"]));
    let validation = Arc::new(rejecting(1, "Cite the source."));
    let gates = GateSet::builder()
        .generation(generation.clone())
        .validation(validation.clone())
        .build()
        .unwrap();

    let settings = PipelineSettings::default().with_max_regenerations(3);
    let result = run_with(gates, settings, "What changed in 1.2?").await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.response, "draft B");
    assert_eq!(result.invocation_count("generation"), 2);
    assert_eq!(result.invocation_count("validation"), 2);
    assert_eq!(
        result.gate_sequence(),
        vec!["generation", "validation", "generation", "validation"]
    );
    assert_eq!(result.metadata.regeneration_attempts, 1);
    assert!(!result.metadata.regeneration_exhausted);

    let seen = generation.effective_messages();
    assert_eq!(seen[0], "What changed in 1.2?");
    assert!(seen[1].starts_with("What changed in 1.2?"));
    assert!(seen[1].contains("Cite the source."));

    let attempts = &result.metadata.attempts;
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].fix_guidance, None);
    assert_eq!(attempts[1].fix_guidance.as_deref(), Some("Cite the source."));

    // validation sees the same message generation answered
    assert_eq!(validation.effective_messages(), seen);
}

#[tokio::test]
async fn test_exhaustion_accepts_last_draft_by_default() {
    let gates = GateSet::builder()
        .generation(Arc::new(ScriptedGate::drafts(
            "generation",
            ["first try", "second try"],
        )))
        .validation(Arc::new(always_rejecting()))
        .build()
        .unwrap();

    let settings = PipelineSettings::default().with_max_regenerations(1);
    let result = run_with(gates, settings, "hi").await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.response, "second try");
    assert_eq!(result.invocation_count("generation"), 2);
    assert_eq!(result.invocation_count("validation"), 2);
    assert!(result.metadata.regeneration_exhausted);
}

#[tokio::test]
async fn test_exhaustion_can_degrade() {
    let gates = GateSet::builder()
        .generation(Arc::new(ScriptedGate::drafts("generation", ["only draft"])))
        .validation(Arc::new(always_rejecting()))
        .build()
        .unwrap();

    let settings = PipelineSettings::default()
        .with_max_regenerations(0)
        .with_exhaustion_policy(ExhaustionPolicy::Degrade);
    let result = run_with(gates, settings, "hi").await;

    assert_eq!(result.status, PipelineStatus::Degraded);
    assert_eq!(result.response, "only draft");
    assert_eq!(result.invocation_count("generation"), 1);
    assert_eq!(result.metadata.degraded_by, vec![REGENERATION_SOURCE]);
}

#[tokio::test]
async fn test_validator_revision_replaces_draft() {
    let gates = GateSet::builder()
        .generation(Arc::new(ScriptedGate::drafts("generation", ["  raw draft  "])))
        .validation(Arc::new(ScriptedGate::responding(
            "validation",
            GateResult::pass("validation", GateOutput::text("polished draft")),
        )))
        .build()
        .unwrap();

    let result = run_with(gates, PipelineSettings::default(), "hi").await;

    assert_eq!(result.response, "polished draft");
}

#[tokio::test]
async fn test_validation_stop_ends_loop() {
    let gates = GateSet::builder()
        .generation(Arc::new(ScriptedGate::drafts("generation", ["leaky"])))
        .validation(Arc::new(ScriptedGate::responding(
            "validation",
            GateResult::stop("validation", "leaked secret", "I can't share that."),
        )))
        .memory(Arc::new(ScriptedGate::passing("memory")))
        .build()
        .unwrap();

    let result = run_with(gates, PipelineSettings::default(), "hi").await;

    assert_eq!(result.status, PipelineStatus::Stopped);
    assert_eq!(result.response, "I can't share that.");
    assert_eq!(result.invocation_count("memory"), 0);
}

#[tokio::test]
async fn test_generation_without_text_is_an_error() {
    let gates = GateSet::builder()
        .generation(Arc::new(ScriptedGate::passing("generation")))
        .build()
        .unwrap();

    let result = run_with(gates, PipelineSettings::default(), "hi").await;

    assert_eq!(result.status, PipelineStatus::Error);
    assert!(result
        .metadata
        .error
        .as_deref()
        .unwrap()
        .contains("no draft"));
}

#[tokio::test]
async fn test_memory_sees_accepted_draft() {
    let generation = Arc::new(ScriptedGate::drafts("generation", ["rejected", "accepted"]));
    let gates = GateSet::builder()
        .generation(generation)
        .validation(Arc::new(rejecting(1, "Shorter.")))
        .memory(Arc::new(ScriptedGate::passing("memory")))
        .build()
        .unwrap();

    let orchestrator = PipelineOrchestrator::new(gates, PipelineSettings::default());
    let result = orchestrator.run("hi", &test_context()).await;

    assert_eq!(result.response, "accepted");
    assert_eq!(result.gate_sequence().last(), Some(&"memory"));
}

proptest! {
    #[test]
    fn generation_attempts_are_bounded(max in 0u32..5, rejections in 0usize..8) {
        let drafts: Vec<String> = (0..=8).map(|i| format!("draft {i}")).collect();
        let generation = Arc::new(ScriptedGate::drafts("generation", drafts));
        let gates = GateSet::builder()
            .generation(generation.clone())
            .validation(Arc::new(rejecting(rejections, "Fix it.")))
            .build()
            .unwrap();

        let settings = PipelineSettings::default().with_max_regenerations(max);
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(run_with(gates, settings, "original question"));

        let expected = rejections.min(max as usize) + 1;
        prop_assert_eq!(result.invocation_count("generation"), expected);
        prop_assert_eq!(result.status, PipelineStatus::Success);
        prop_assert_eq!(result.metadata.regeneration_exhausted, rejections > max as usize);
        prop_assert_eq!(result.response, format!("draft {}", expected - 1));

        let seen = generation.effective_messages();
        prop_assert_eq!(seen[0].as_str(), "original question");
        for message in &seen {
            prop_assert!(message.starts_with("original question"));
        }
    }
}
