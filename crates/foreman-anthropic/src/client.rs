// Claude Messages API client
//
// Maps the provider-agnostic request onto Anthropic's Messages API. System
// messages become the top-level `system` field; the rest go into
// `messages`. The cancel token aborts the call between suspension points
// and surfaces as ProviderError::Cancelled.

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

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Dollars per million tokens, (input, output), longest prefix match
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("claude-opus-4", 15.0, 75.0),
    ("claude-sonnet-4", 3.0, 15.0),
    ("claude-haiku-3-5", 0.8, 4.0),
];

const FALLBACK_PRICING: (f64, f64) = (3.0, 15.0);

/// Claude backend for the provider registry
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    api_url: String,
    timeout: Duration,
}

impl AnthropicClient {
    /// Create a new client with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a new client with a custom API URL (for gateways)
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
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();
        for message in &request.messages {
            match message.role {
                ChatRole::System => system_parts.push(message.content.clone()),
                ChatRole::User => messages.push(json!({
                    "role": "user",
                    "content": message.content,
                })),
                ChatRole::Assistant => messages.push(json!({
                    "role": "assistant",
                    "content": message.content,
                })),
            }
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = json!(stop);
        }
        body
    }

    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = self.build_body(request);
        let started = Instant::now();

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let parsed: MessagesResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Unavailable(format!("malformed response: {}", e)))?;
        let text = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let tokens_in = parsed.usage.input_tokens;
        let tokens_out = parsed.usage.output_tokens;
        debug!(
            model = %parsed.model,
            tokens_in,
            tokens_out,
            "anthropic call completed"
        );

        Ok(ProviderResponse {
            provider: "claude".to_string(),
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
impl ProviderClient for AnthropicClient {
    fn name(&self) -> &str {
        "claude"
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
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}
