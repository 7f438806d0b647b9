// LLM provider abstraction
//
// Provider-agnostic request/response surface. Implementations handle the
// provider-specific API calls; the engine only ever sees this trait.
//
// IMPORTANT: API keys are resolved from the environment variable named in
// configuration (`api_key_env`) at client construction. Clients never read
// ambient well-known variables on their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Message role for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in a provider request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Provider-agnostic request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            stop: None,
        }
    }

    /// Crude token estimate used for budget projection before a call is
    /// issued (chars / 4, the usual heuristic).
    pub fn estimated_tokens_in(&self) -> u32 {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        (chars / 4) as u32
    }
}

/// Successful provider response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider: String,
    pub model: String,
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    /// The provider's raw response body, kept for the audit trail
    pub raw: serde_json::Value,
}

/// Failure modes of a provider call
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures are retried by the engine; permanent ones fail
    /// the phase immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Unavailable(_)
        )
    }
}

/// Trait for LLM provider backends
///
/// Implementations must honor the cancel token promptly: a cancelled call
/// returns `ProviderError::Cancelled` rather than its result.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable identifier (`claude`, `openai`, ...)
    fn name(&self) -> &str;

    /// Models this backend can serve
    fn models(&self) -> Vec<String>;

    /// Issue one request
    async fn execute(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Dollar cost of a hypothetical call, used for accounting and budget
    /// projection
    fn cost_estimate(&self, tokens_in: u32, tokens_out: u32, model: &str) -> f64;
}

#[async_trait]
impl ProviderClient for Arc<dyn ProviderClient> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn models(&self) -> Vec<String> {
        (**self).models()
    }

    async fn execute(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        (**self).execute(request, cancel).await
    }

    fn cost_estimate(&self, tokens_in: u32, tokens_out: u32, model: &str) -> f64 {
        (**self).cost_estimate(tokens_in, tokens_out, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(120)).is_transient());
        assert!(ProviderError::Unavailable("503".into()).is_transient());
        assert!(!ProviderError::Auth("bad key".into()).is_transient());
        assert!(!ProviderError::InvalidRequest("no model".into()).is_transient());
        assert!(!ProviderError::Cancelled.is_transient());
    }

    #[test]
    fn test_estimated_tokens() {
        let request = ProviderRequest::new(
            "m",
            vec![ChatMessage::system("abcd"), ChatMessage::user("efgh")],
        );
        assert_eq!(request.estimated_tokens_in(), 2);
    }
}
