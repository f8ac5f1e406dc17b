//! Assistant configuration loaded from TOML
//!
//! ```toml
//! [assistant]
//! id = "helper"
//! description = "General purpose assistant"
//!
//! [llm]
//! provider = "anthropic"
//! model = "claude-sonnet-4-20250514"
//! api_key_env = "ANTHROPIC_API_KEY"
//! system_prompt = "You are a helpful assistant."
//!
//! [pipeline]
//! max_regenerations = 2
//! on_exhaustion = "accept"
//!
//! [[intent.rules]]
//! name = "weather"
//! pattern = "(?i)weather"
//! tool = "http_fetch"
//! parameters = { url = "https://wttr.in/", query = { format = "j1", q = "{message}" } }
//!
//! [tools]
//! http_fetch = "builtin"
//! ```
//!
//! Secrets are referenced by environment variable name and resolved at runtime.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Main assistant configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantConfig {
    pub assistant: AssistantSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub intent: IntentSection,
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub memory: MemorySection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantSection {
    /// Assistant identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Provider name ("anthropic" or "openai")
    pub provider: String,
    pub model: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    pub system_prompt: String,
    /// Optional temperature (0.0 to 2.0)
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Override the provider's API base URL
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_timeout_secs() -> u64 {
    60
}

/// What to report when validation never accepts a draft
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Deliver the last draft as a normal success
    #[default]
    Accept,
    /// Deliver the last draft flagged as degraded
    Degrade,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Extra generation attempts validation may request per turn
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,
    #[serde(default)]
    pub on_exhaustion: ExhaustionPolicy,
    /// Per-gate deadline; unset means no limit
    pub gate_timeout_ms: Option<u64>,
    /// Whole-request deadline enforced by the HTTP surface
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "default_stopped_message")]
    pub stopped_message: String,
    #[serde(default = "default_error_message")]
    pub error_message: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_regenerations: default_max_regenerations(),
            on_exhaustion: ExhaustionPolicy::default(),
            gate_timeout_ms: None,
            request_timeout_ms: None,
            stopped_message: default_stopped_message(),
            error_message: default_error_message(),
        }
    }
}

fn default_max_regenerations() -> u32 {
    2
}

pub fn default_stopped_message() -> String {
    "I can't help with that request.".to_string()
}

pub fn default_error_message() -> String {
    "Sorry, something went wrong while handling your message. Please try again.".to_string()
}

pub fn default_ack_message() -> String {
    "Please confirm before I continue.".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> u64 {
    64 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySection {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Regexes that halt the pipeline outright
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default = "default_refusal_message")]
    pub refusal_message: String,
    #[serde(default = "default_empty_message_prompt")]
    pub empty_message_prompt: String,
    #[serde(default = "default_too_long_message")]
    pub too_long_message: String,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            blocked_patterns: Vec::new(),
            refusal_message: default_refusal_message(),
            empty_message_prompt: default_empty_message_prompt(),
            too_long_message: default_too_long_message(),
        }
    }
}

fn default_max_message_chars() -> usize {
    4000
}

fn default_refusal_message() -> String {
    "I can't help with that.".to_string()
}

fn default_empty_message_prompt() -> String {
    "It looks like your message was empty. What can I help you with?".to_string()
}

fn default_too_long_message() -> String {
    "That message is too long for me to handle. Could you shorten it?".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentSection {
    #[serde(default = "default_route")]
    pub default_route: String,
    /// Lifetime of a confirmation token
    #[serde(default = "default_ack_ttl_secs")]
    pub ack_ttl_secs: u64,
    #[serde(default)]
    pub rules: Vec<IntentRuleConfig>,
}

impl Default for IntentSection {
    fn default() -> Self {
        Self {
            default_route: default_route(),
            ack_ttl_secs: default_ack_ttl_secs(),
            rules: Vec::new(),
        }
    }
}

fn default_route() -> String {
    "chat".to_string()
}

fn default_ack_ttl_secs() -> u64 {
    900
}

/// One intent rule: the first rule whose pattern matches wins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentRuleConfig {
    pub name: String,
    pub pattern: String,
    /// Tool to call for live data
    pub tool: Option<String>,
    /// Tool parameters; string values may contain `{message}`
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// Require explicit user confirmation before replying
    #[serde(default)]
    pub confirm: bool,
    pub summary: Option<String>,
}

/// Tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolConfig {
    /// Simple form: tool_name = "builtin"
    Simple(String),
    /// Complex form: tool_name = { impl = "builtin", config = { ... } }
    Complex {
        #[serde(rename = "impl")]
        implementation: String,
        #[serde(default)]
        config: HashMap<String, serde_json::Value>,
    },
}

impl ToolConfig {
    pub fn implementation(&self) -> &str {
        match self {
            ToolConfig::Simple(implementation) => implementation,
            ToolConfig::Complex { implementation, .. } => implementation,
        }
    }

    /// Tool settings as a JSON object (empty for the simple form)
    pub fn settings(&self) -> serde_json::Value {
        match self {
            ToolConfig::Simple(_) => serde_json::json!({}),
            ToolConfig::Complex { config, .. } => serde_json::json!(config),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationSection {
    pub max_response_chars: Option<usize>,
    #[serde(default)]
    pub rules: Vec<ValidationRuleConfig>,
}

/// A draft matching `pattern` is sent back with `guidance`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRuleConfig {
    pub id: String,
    pub pattern: String,
    pub guidance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySection {
    /// Turns retained per conversation
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Turns of history included in the prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            history_window: default_history_window(),
        }
    }
}

fn default_max_turns() -> usize {
    200
}

fn default_history_window() -> usize {
    20
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid assistant ID format: {0}")]
    InvalidAssistantId(String),
    #[error("Invalid pattern '{pattern}' in {section}: {reason}")]
    InvalidPattern {
        section: String,
        pattern: String,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AssistantConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AssistantConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_assistant_id(&self.assistant.id)?;

        if self.llm.system_prompt.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "llm.system_prompt must not be empty".to_string(),
            ));
        }
        if let Some(temperature) = self.llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidConfig(format!(
                    "llm.temperature {temperature} is outside 0.0..=2.0"
                )));
            }
        }
        if self.pipeline.gate_timeout_ms == Some(0) || self.pipeline.request_timeout_ms == Some(0)
        {
            return Err(ConfigError::InvalidConfig(
                "pipeline timeouts must be greater than zero".to_string(),
            ));
        }

        for pattern in &self.policy.blocked_patterns {
            compile_pattern("policy.blocked_patterns", pattern)?;
        }

        for rule in &self.intent.rules {
            compile_pattern(&format!("intent rule '{}'", rule.name), &rule.pattern)?;
            if let Some(tool) = &rule.tool {
                if !self.tools.contains_key(tool) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "intent rule '{}' references unknown tool '{}'",
                        rule.name, tool
                    )));
                }
            }
        }

        for rule in &self.validation.rules {
            compile_pattern(&format!("validation rule '{}'", rule.id), &rule.pattern)?;
        }

        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.llm.api_key_env)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[assistant]
id = "test-assistant"
description = "A test assistant"

[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
api_key_env = "ANTHROPIC_API_KEY"
system_prompt = "You are a helpful assistant."
temperature = 0.7
max_tokens = 1000
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Compile a configured regex, mapping failures to a config error
pub fn compile_pattern(section: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        section: section.to_string(),
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn validate_assistant_id(assistant_id: &str) -> Result<(), ConfigError> {
    let valid_chars = assistant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if assistant_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidAssistantId(format!(
            "Assistant ID '{assistant_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
