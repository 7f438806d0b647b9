// Chat Completions API client
//
// Maps the provider-agnostic request onto OpenAI's chat completion
// protocol. Works with any OpenAI-compatible endpoint through the base URL
// override.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use foreman_core::config::ProviderConfig;
use foreman_core::provider::{
    ChatRole, ProviderClient, ProviderError, ProviderRequest, ProviderResponse,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Dollars per million tokens, (input, output), longest prefix match
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-4o", 2.5, 10.0),
    ("o3", 2.0, 8.0),
];

const FALLBACK_PRICING: (f64, f64) = (2.5, 10.0);

/// OpenAI backend for the provider registry
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_url: String,
    timeout: Duration,
}

impl OpenAiClient {
    /// Create a new client with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a new client with a custom API URL (for OpenAI-compatible APIs)
    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::new(api_key)
        }
    }

    /// Build from declarative configuration, resolving the API key from
    /// the environment variable it names.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::Auth(format!("{} environment variable not set", config.api_key_env))
        })?;
        let mut client = match &config.base_url {
            Some(url) => Self::with_base_url(api_key, url.clone()),
            None => Self::new(api_key),
        };
        if let Some(seconds) = config.timeout_seconds {
            client.timeout = Duration::from_secs(seconds);
        }
        Ok(client)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_body(&self, request: &ProviderRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                json!({"role": role, "content": message.content})
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_completion_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }
        body
    }

    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = self.build_body(request);
        let started = Instant::now();

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let retry_after = parse_retry_after(&response);
        let raw: Value = response.json().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(map_status(status, retry_after, &raw));
        }

        let parsed: ChatCompletionResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Unavailable(format!("malformed response: {}", e)))?;
        let text = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        let tokens_in = parsed.usage.prompt_tokens;
        let tokens_out = parsed.usage.completion_tokens;
        debug!(
            model = %parsed.model,
            tokens_in,
            tokens_out,
            "openai call completed"
        );

        Ok(ProviderResponse {
            provider: "openai".to_string(),
            model: parsed.model,
            text,
            tokens_in,
            tokens_out,
            cost_usd: self.cost_estimate(tokens_in, tokens_out, &request.model),
            latency_ms: started.elapsed().as_millis() as u64,
            raw,
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn models(&self) -> Vec<String> {
        MODEL_PRICING
            .iter()
            .map(|(model, _, _)| model.to_string())
            .collect()
    }

    async fn execute(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.send(&request)) => {
                result.unwrap_or(Err(ProviderError::Timeout(self.timeout)))
            }
        }
    }

    fn cost_estimate(&self, tokens_in: u32, tokens_out: u32, model: &str) -> f64 {
        let (input_rate, output_rate) = MODEL_PRICING
            .iter()
            .find(|(prefix, _, _)| model.starts_with(prefix))
            .map(|(_, input, output)| (*input, *output))
            .unwrap_or(FALLBACK_PRICING);
        (tokens_in as f64 * input_rate + tokens_out as f64 * output_rate) / 1_000_000.0
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(DEFAULT_TIMEOUT)
    } else if err.is_connect() {
        ProviderError::Unavailable(format!("connection failed: {}", err))
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn map_status(status: StatusCode, retry_after: Option<Duration>, raw: &Value) -> ProviderError {
    let message = raw["error"]["message"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after },
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            ProviderError::InvalidRequest(message)
        }
        _ => ProviderError::Unavailable(format!("{}: {}", status, message)),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
