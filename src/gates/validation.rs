//! Draft validation
//!
//! Checks the current draft against configured content rules and the length
//! cap. Violations send the draft back for regeneration with guidance.

use crate::config::{compile_pattern, ConfigError, ValidationSection};
use crate::pipeline::{Gate, GateError, GateOutput, GateResult, PipelineContext, PipelineState};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::debug;

struct ValidationRule {
    id: String,
    pattern: Regex,
    guidance: String,
}

pub struct ValidationGate {
    rules: Vec<ValidationRule>,
    max_response_chars: Option<usize>,
}

impl ValidationGate {
    pub const ID: &'static str = "validation";

    pub fn new(section: &ValidationSection) -> Result<Self, ConfigError> {
        let rules = section
            .rules
            .iter()
            .map(|rule| {
                Ok(ValidationRule {
                    id: rule.id.clone(),
                    pattern: compile_pattern(&format!("validation rule '{}'", rule.id), &rule.pattern)?,
                    guidance: rule.guidance.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rules,
            max_response_chars: section.max_response_chars,
        })
    }

    /// Violated rule ids paired with their guidance, in rule order
    fn violations(&self, draft: &str) -> Vec<(String, String)> {
        let mut violations: Vec<(String, String)> = self
            .rules
            .iter()
            .filter(|rule| rule.pattern.is_match(draft))
            .map(|rule| (rule.id.clone(), rule.guidance.clone()))
            .collect();

        if let Some(max) = self.max_response_chars {
            if draft.chars().count() > max {
                violations.push((
                    "max_response_chars".to_string(),
                    format!("Keep the reply under {max} characters."),
                ));
            }
        }

        violations
    }
}

#[async_trait]
impl Gate for ValidationGate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        _ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        let draft = state
            .generation()
            .ok_or_else(|| GateError::invalid_input("no draft to validate"))?
            .trim();

        let violations = self.violations(draft);
        if violations.is_empty() {
            return Ok(GateResult::pass(Self::ID, GateOutput::text(draft)));
        }

        let ids: Vec<&str> = violations.iter().map(|(id, _)| id.as_str()).collect();
        debug!(rules = ?ids, "Draft failed validation");
        let guidance = violations
            .iter()
            .map(|(_, guidance)| guidance.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let result = GateResult::regenerate(
            Self::ID,
            format!("draft violated: {}", ids.join(", ")),
            Some(guidance),
        );
        Ok(result.map_output(|output| output.with_data(json!({ "violations": ids }))))
    }
}
