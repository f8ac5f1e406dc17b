//! LLM provider abstraction layer
//!
//! A provider-agnostic completion interface with Anthropic and OpenAI backends.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;

use crate::config::LlmSection;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured provider with an already resolved API key
pub fn create_provider(
    section: &LlmSection,
    api_key: String,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let timeout = Duration::from_secs(section.timeout_secs);

    match section.provider.as_str() {
        "openai" => {
            let mut config = OpenAiConfig {
                api_key,
                timeout,
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                config.base_url = base_url.trim_end_matches('/').to_string();
            }
            Ok(Arc::new(OpenAiProvider::new(config)?))
        }
        "anthropic" => {
            let mut config = AnthropicConfig {
                api_key,
                timeout,
                ..Default::default()
            };
            if let Some(base_url) = &section.base_url {
                config.base_url = base_url.trim_end_matches('/').to_string();
            }
            Ok(Arc::new(AnthropicProvider::new(config)?))
        }
        other => Err(LlmError::NotConfigured(format!(
            "Unsupported LLM provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantConfig;

    #[test]
    fn test_create_known_providers() {
        let mut section = AssistantConfig::test_config().llm;
        let provider = create_provider(&section, "key".to_string()).unwrap();
        assert_eq!(provider.name(), "anthropic");

        section.provider = "openai".to_string();
        section.base_url = Some("http://localhost:9999/v1/".to_string());
        let provider = create_provider(&section, "key".to_string()).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut section = AssistantConfig::test_config().llm;
        section.provider = "carrier-pigeon".to_string();
        let result = create_provider(&section, "key".to_string());
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }
}
