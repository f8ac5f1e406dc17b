//! Application-level error types
//!
//! Layer-specific errors (`GateError`, `LlmError`, `ToolError`, `ConfigError`,
//! `StoreError`, `PipelineError`) live next to the code that raises them and
//! roll up into [`AssistantError`]. Anything that may reach a client or the
//! result metadata goes through [`sanitize_error_message`] first.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_ERROR_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});
static BEARER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").expect("bearer pattern is valid"));
static CREDENTIAL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("credential path pattern is valid")
});

/// Main error type for the assistant backend
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("LLM provider error: {0}")]
    Llm(#[from] crate::llm::provider::LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Server error: {message}")]
    Server { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Stable error codes exposed over HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    ConfigurationError,
    UpstreamError,
    InternalError,
}

/// JSON error body returned by the HTTP surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl AssistantError {
    /// Convert to a client-safe error body
    pub fn to_error_body(&self) -> ErrorBody {
        let code = match self {
            AssistantError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AssistantError::Config(_) | AssistantError::Pipeline(_) => {
                ErrorCode::ConfigurationError
            }
            AssistantError::Llm(_) | AssistantError::Tool(_) | AssistantError::Store(_) => {
                ErrorCode::UpstreamError
            }
            AssistantError::Server { .. } | AssistantError::Internal { .. } => {
                ErrorCode::InternalError
            }
        };

        ErrorBody {
            code,
            message: sanitize_error_message(&self.to_string()),
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn server<S: Into<String>>(message: S) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Redact secrets and credential paths, then cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_ASSIGNMENT.replace_all(message, "${1}=***");
    let sanitized = BEARER_TOKEN.replace_all(&sanitized, "Bearer ***");
    let mut sanitized = CREDENTIAL_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_ERROR_LEN {
        let mut cut = MAX_ERROR_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for assistant operations
pub type AssistantResult<T> = Result<T, AssistantError>;
