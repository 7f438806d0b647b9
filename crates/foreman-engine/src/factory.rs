// Provider registry construction
//
// Builds the process-wide registry from declarative configuration. The
// bundled backends are `claude` and `openai`; any other provider name is
// a configuration error naming the supported set.

use std::sync::Arc;

use foreman_anthropic::AnthropicClient;
use foreman_core::config::ForemanConfig;
use foreman_core::{ForemanError, ProviderRegistry, Result};
use foreman_openai::OpenAiClient;

/// Instantiate every enabled provider from configuration.
pub fn build_registry(config: &ForemanConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    for (name, provider_config) in config.enabled_providers() {
        match name.as_str() {
            "claude" => {
                let client = AnthropicClient::from_config(provider_config)
                    .map_err(|e| ForemanError::validation(e.to_string()))?;
                registry.register(Arc::new(client));
            }
            "openai" => {
                let client = OpenAiClient::from_config(provider_config)
                    .map_err(|e| ForemanError::validation(e.to_string()))?;
                registry.register(Arc::new(client));
            }
            other => {
                return Err(ForemanError::validation(format!(
                    "unknown provider type '{}'; supported: claude, openai",
                    other
                )));
            }
        }
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let config = ForemanConfig::from_toml(
            r#"
            [providers.gemini]
            api_key_env = "GEMINI_API_KEY"
            default_model = "gemini-pro"
            "#,
        )
        .unwrap();
        let err = build_registry(&config).unwrap_err();
        assert!(err.to_string().contains("unknown provider type"));
    }

    #[test]
    fn test_disabled_providers_are_skipped() {
        let config = ForemanConfig::from_toml(
            r#"
            [providers.claude]
            api_key_env = "FOREMAN_TEST_MISSING_KEY"
            default_model = "claude-sonnet-4"
            enabled = false
            "#,
        )
        .unwrap();
        let registry = build_registry(&config).unwrap();
        assert!(registry.is_empty());
    }
}
