//! Intent routing
//!
//! Classifies the message against `[[intent.rules]]`. The first matching rule
//! names the route and may request a tool call or a user confirmation. Turns
//! that need no tool skip the live-data stage.

use crate::config::{compile_pattern, ConfigError, IntentSection};
use crate::pipeline::{
    Gate, GateError, GateOutput, GateResult, PipelineContext, PipelineState, Signal, Stage,
    ToolRequest,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

/// Placeholder replaced by the normalized user message in tool parameters
pub const MESSAGE_PLACEHOLDER: &str = "{message}";

struct IntentRule {
    name: String,
    pattern: Regex,
    tool: Option<String>,
    parameters: Value,
    confirm: bool,
    summary: Option<String>,
}

pub struct IntentGate {
    rules: Vec<IntentRule>,
    default_route: String,
}

impl IntentGate {
    pub const ID: &'static str = "intent";

    pub fn new(section: &IntentSection) -> Result<Self, ConfigError> {
        let rules = section
            .rules
            .iter()
            .map(|rule| {
                Ok(IntentRule {
                    name: rule.name.clone(),
                    pattern: compile_pattern(&format!("intent rule '{}'", rule.name), &rule.pattern)?,
                    tool: rule.tool.clone(),
                    parameters: rule.parameters.clone().unwrap_or_else(|| json!({})),
                    confirm: rule.confirm,
                    summary: rule.summary.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rules,
            default_route: section.default_route.clone(),
        })
    }
}

/// Substitute the message into every string value, recursively
pub fn render_parameters(template: &Value, message: &str) -> Value {
    match template {
        Value::String(s) => Value::String(s.replace(MESSAGE_PLACEHOLDER, message)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_parameters(item, message))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render_parameters(value, message)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl Gate for IntentGate {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn evaluate(
        &self,
        state: &PipelineState,
        _ctx: &PipelineContext,
    ) -> Result<GateResult, GateError> {
        let message = state.normalized_input();
        let Some(rule) = self.rules.iter().find(|rule| rule.pattern.is_match(message)) else {
            let output = GateOutput::empty()
                .with_signal(Signal::Route {
                    route: self.default_route.clone(),
                })
                .with_signal(Signal::SkipStage {
                    stage: Stage::LiveData,
                })
                .with_data(json!({ "route": self.default_route, "matched": false }));
            return Ok(GateResult::pass(Self::ID, output));
        };

        debug!(route = %rule.name, tool = ?rule.tool, "Intent rule matched");
        let mut output = GateOutput::empty().with_signal(Signal::Route {
            route: rule.name.clone(),
        });

        output = match &rule.tool {
            Some(tool) => output.with_signal(Signal::ExternalTool(ToolRequest {
                tool: tool.clone(),
                parameters: render_parameters(&rule.parameters, message),
            })),
            None => output.with_signal(Signal::SkipStage {
                stage: Stage::LiveData,
            }),
        };

        if rule.confirm {
            let summary = rule
                .summary
                .clone()
                .unwrap_or_else(|| format!("Please confirm that you want me to {}.", rule.name));
            output = output.with_signal(Signal::ConfirmationRequired {
                action: rule.name.clone(),
                summary,
            });
        }

        Ok(GateResult::pass(
            Self::ID,
            output.with_data(json!({ "route": rule.name, "matched": true })),
        ))
    }
}
