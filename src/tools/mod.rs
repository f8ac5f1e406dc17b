//! Live-data tool system
//!
//! Tools are configured under `[tools]`, initialized once at startup, and
//! executed by the live-data gate with JSON-schema validated parameters.

use crate::config::ToolConfig;
use crate::observability::metrics;
use crate::tool_span;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn, Instrument};

pub mod builtin;

/// A callable source of live data
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, purpose and JSON schema of the accepted parameters
    fn describe(&self) -> ToolDescription;

    /// Apply the tool's `[tools]` settings; called once at startup
    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError>;

    /// Run with parameters already validated against `describe().parameters`
    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError>;

    async fn shutdown(&mut self) -> Result<(), ToolError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Registry of initialized tools
pub struct ToolSystem {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolSystem {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create and initialize every configured tool
    pub async fn initialize(
        &mut self,
        tool_configs: &HashMap<String, ToolConfig>,
    ) -> Result<(), ToolError> {
        for (tool_name, tool_config) in tool_configs {
            let mut tool = create_tool(tool_name, tool_config)?;
            let settings = match tool_config {
                ToolConfig::Simple(_) => None,
                ToolConfig::Complex { .. } => Some(tool_config.settings()),
            };
            tool.initialize(settings.as_ref()).await?;
            debug!(tool = %tool_name, "Tool initialized");
            self.tools.insert(tool_name.clone(), tool);
        }

        Ok(())
    }

    /// Register an already initialized tool under `name`
    pub fn register(&mut self, name: impl Into<String>, tool: Box<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    pub fn describe_tool(&self, tool_name: &str) -> Option<ToolDescription> {
        self.tools.get(tool_name).map(|tool| tool.describe())
    }

    /// Validate parameters and execute the named tool
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        validate_parameters(&tool.describe(), parameters)?;

        let started = Instant::now();
        let result = tool
            .execute(parameters)
            .instrument(tool_span!(tool = %tool_name))
            .await;
        let elapsed = started.elapsed();

        metrics().tool_executed(tool_name, elapsed, result.is_ok());
        match &result {
            Ok(_) => debug!(tool = %tool_name, elapsed_ms = elapsed.as_millis() as u64, "Tool executed"),
            Err(ToolError::Timeout(_)) => {
                metrics().tool_timeout(tool_name);
                warn!(tool = %tool_name, "Tool timed out");
            }
            Err(e) => warn!(tool = %tool_name, error = %e, "Tool execution failed"),
        }

        result
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    pub async fn shutdown(&mut self) -> Result<(), ToolError> {
        for tool in self.tools.values_mut() {
            tool.shutdown().await?;
        }
        Ok(())
    }
}

impl Default for ToolSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn create_tool(tool_name: &str, config: &ToolConfig) -> Result<Box<dyn Tool>, ToolError> {
    match config.implementation() {
        "builtin" => {
            // `config.builtin` lets a builtin serve under another name
            let settings = config.settings();
            let builtin = settings
                .get("builtin")
                .and_then(Value::as_str)
                .unwrap_or(tool_name);
            match builtin {
                "http_fetch" => Ok(Box::new(builtin::HttpFetchTool::new())),
                _ => Err(ToolError::UnknownTool(tool_name.to_string())),
            }
        }
        other => Err(ToolError::UnknownImplementation(other.to_string())),
    }
}

/// Check `parameters` against the tool's JSON schema
fn validate_parameters(description: &ToolDescription, parameters: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(&description.parameters)
        .map_err(|e| ToolError::SchemaError(format!("Schema compilation error: {e}")))?;

    validator.validate(parameters).map_err(|errors| {
        let messages: Vec<String> = errors
            .map(|e| format!("At '{}': {}", e.instance_path, e))
            .collect();
        ToolError::ValidationError(messages.join("; "))
    })
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Unknown tool implementation: {0}")]
    UnknownImplementation(String),
    #[error("Tool initialization failed: {0}")]
    InitializationError(String),
    #[error("Parameter validation failed: {0}")]
    ValidationError(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
    #[error("Tool timed out: {0}")]
    Timeout(String),
    #[error("Tool shutdown failed: {0}")]
    ShutdownError(String),
}
