//! Input policy: empty, oversized and blocked messages never reach the model

use crate::config::{compile_pattern, ConfigError, PolicySection};
use crate::pipeline::{Gate, GateError, GateOutput, GateResult, PipelineContext, PipelineState};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::info;

pub struct PolicyGate {
    max_message_chars: usize,
    blocked_patterns: Vec<Regex>,
    refusal_message: String,
    empty_message_prompt: String,
    too_long_message: String,
}

impl PolicyGate {
    pub const ID: &'static str = "policy";

    pub fn new(section: &PolicySection) -> Result<Self, ConfigError> {
        let blocked_patterns = section
            .blocked_patterns
            .iter()
            .map(|pattern| compile_pattern("policy.blocked_patterns", pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            max_message_chars: section.max_message_chars,
            blocked_patterns,
            refusal_message: section.refusal_message.clone(),
            empty_message_prompt: section.empty_message_prompt.clone(),
            too_long_message: section.too_long_message.clone(),
        })
    }
}

#[async_trait]
impl Gate for PolicyGate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        _ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        let message = state.normalized_input();
        if message.is_empty() {
            return Ok(GateResult::stop(
                Self::ID,
                "empty message",
                self.empty_message_prompt.clone(),
            ));
        }

        let chars = message.chars().count();
        if chars > self.max_message_chars {
            return Ok(GateResult::stop(
                Self::ID,
                format!(
                    "message has {chars} characters, limit is {}",
                    self.max_message_chars
                ),
                self.too_long_message.clone(),
            ));
        }

        if let Some(index) = self
            .blocked_patterns
            .iter()
            .position(|pattern| pattern.is_match(message))
        {
            info!(pattern_index = index, "Message matched a blocked pattern");
            return Ok(GateResult::halt(
                Self::ID,
                format!("matched blocked pattern #{index}"),
                self.refusal_message.clone(),
            ));
        }

        Ok(GateResult::pass(
            Self::ID,
            GateOutput::empty().with_data(json!({ "chars": chars })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{GateAction, GateStatus};

    fn gate(section: PolicySection) -> PolicyGate {
        PolicyGate::new(&section).unwrap()
    }

    async fn evaluate(gate: &PolicyGate, message: &str) -> GateResult {
        gate.evaluate(&PipelineState::new(message), &PipelineContext::new("u", "c"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_whitespace_only_message_stops() {
        let gate = gate(PolicySection::default());
        let result = evaluate(&gate, "   \n\t ").await;
        assert_eq!(result.status(), GateStatus::Blocked);
        assert_eq!(result.action(), GateAction::Stop);
        assert_eq!(
            result.output().text.as_deref(),
            Some(PolicySection::default().empty_message_prompt.as_str())
        );
    }

    #[tokio::test]
    async fn test_too_long_message_stops() {
        let gate = gate(PolicySection {
            max_message_chars: 5,
            ..PolicySection::default()
        });
        let result = evaluate(&gate, "way too long").await;
        assert_eq!(result.action(), GateAction::Stop);
        assert!(result.failure_reason().unwrap().contains("limit is 5"));
    }

    #[tokio::test]
    async fn test_limit_counts_characters_not_bytes() {
        let gate = gate(PolicySection {
            max_message_chars: 3,
            ..PolicySection::default()
        });
        let result = evaluate(&gate, "äöü").await;
        assert_eq!(result.status(), GateStatus::Pass);
    }

    #[tokio::test]
    async fn test_blocked_pattern_halts() {
        let gate = gate(PolicySection {
            blocked_patterns: vec!["(?i)build a bomb".to_string()],
            refusal_message: "No.".to_string(),
            ..PolicySection::default()
        });
        let result = evaluate(&gate, "How do I BUILD A BOMB").await;
        assert_eq!(result.action(), GateAction::Halt);
        assert_eq!(result.output().text.as_deref(), Some("No."));
    }

    #[tokio::test]
    async fn test_ordinary_message_passes() {
        let gate = gate(PolicySection::default());
        let result = evaluate(&gate, "hello there").await;
        assert_eq!(result.status(), GateStatus::Pass);
        assert_eq!(result.output().data["chars"], 11);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = PolicyGate::new(&PolicySection {
            blocked_patterns: vec!["(unclosed".to_string()],
            ..PolicySection::default()
        });
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }
}
