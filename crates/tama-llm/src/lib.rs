//! Streaming LLM client with multi-provider fallback.
//!
//! Supports Gemini, Anthropic (Claude), OpenRouter, and OpenAI. Providers are
//! tried in priority order; rate limits and transient failures fall through to
//! the next provider, but only until a provider has accepted the request and
//! started streaming. Once a [`TokenStream`] is handed out it belongs to that
//! provider.
//!
//! This crate knows nothing about users, quotas or persistence.

mod sse;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Maximum attempts per provider before fallback
const MAX_RETRIES: u32 = 2;

/// Delay between retries (doubles each time)
const RETRY_DELAY_MS: u64 = 500;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Error types for the LLM service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("No providers configured")]
    NoProviders,

    #[error("Request failed: {0}")]
    Request(String),
}

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Incrementally produced output tokens.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Speaker of a message forwarded to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
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

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.9,
            top_k: 50,
            max_tokens: 2048,
        }
    }
}

/// A streaming completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System instruction placed ahead of the history.
    pub system: String,
    /// Ordered history, oldest first.
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingConfig,
}

/// Anything that can turn a history into a stream of tokens.
///
/// Dropping the returned stream cancels the underlying request.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream>;
}

/// Configuration for an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub priority: u8,
}

/// Configuration for the LLM service.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub providers: Vec<LlmProviderConfig>,
}

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Gemini,
    Anthropic,
    OpenAi,
}

impl Protocol {
    fn for_provider(name: &str) -> Self {
        match name {
            "gemini" => Self::Gemini,
            "anthropic" => Self::Anthropic,
            _ => Self::OpenAi,
        }
    }
}

/// Get default endpoint for a provider
pub fn default_endpoint(name: &str) -> String {
    match name {
        "gemini" => "https://generativelanguage.googleapis.com/v1beta".to_string(),
        "anthropic" => "https://api.anthropic.com/v1".to_string(),
        "openrouter" => "https://openrouter.ai/api/v1".to_string(),
        "openai" => "https://api.openai.com/v1".to_string(),
        _ => "https://api.openai.com/v1".to_string(),
    }
}

/// Get default model for a provider
pub fn default_model(name: &str) -> String {
    match name {
        "gemini" => "gemini-2.5-flash-lite".to_string(),
        "anthropic" => "claude-3-5-haiku-20241022".to_string(),
        "openrouter" => "meta-llama/llama-3-8b-instruct:free".to_string(),
        "openai" => "gpt-4o-mini".to_string(),
        _ => "gpt-4o-mini".to_string(),
    }
}

/// Streaming LLM service with multi-provider fallback.
#[derive(Clone)]
pub struct LlmService {
    inner: Arc<LlmServiceInner>,
}

struct LlmServiceInner {
    providers: Vec<LlmProviderConfig>,
    client: Client,
}

impl LlmService {
    /// Create LLM service from config.
    ///
    /// No overall request timeout is set: a healthy stream may legitimately
    /// run for minutes.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Request(format!("Failed to create HTTP client: {}", e)))?;

        let mut providers = config.providers.clone();
        providers.sort_by_key(|p| p.priority);

        info!(
            providers = ?providers.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "LLM service initialized from config"
        );

        Ok(Self {
            inner: Arc::new(LlmServiceInner { providers, client }),
        })
    }

    /// Provider names in priority order.
    pub fn providers(&self) -> Vec<String> {
        self.inner.providers.iter().map(|p| p.name.clone()).collect()
    }

    pub fn is_available(&self) -> bool {
        !self.inner.providers.is_empty()
    }

    /// Try a specific provider with retries.
    async fn try_provider(
        &self,
        provider: &LlmProviderConfig,
        request: &CompletionRequest,
    ) -> Result<TokenStream> {
        let mut delay = Duration::from_millis(RETRY_DELAY_MS);

        for attempt in 0..MAX_RETRIES {
            match self.open_stream(provider, request).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < MAX_RETRIES - 1 {
                        debug!(
                            provider = %provider.name,
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Retrying after error"
                        );
                        sleep(delay).await;
                        delay *= 2;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(Error::Llm(format!(
            "Provider {} failed after {} retries",
            provider.name, MAX_RETRIES
        )))
    }

    /// Check if an error is retryable
    fn is_retryable(error: &Error) -> bool {
        matches!(error, Error::RateLimitExceeded)
            || error.to_string().contains("503")
            || error.to_string().contains("timeout")
    }

    /// Send the request and hand back the token stream once the provider
    /// has answered with a success status.
    async fn open_stream(
        &self,
        provider: &LlmProviderConfig,
        request: &CompletionRequest,
    ) -> Result<TokenStream> {
        let protocol = Protocol::for_provider(&provider.name);

        debug!(
            provider = %provider.name,
            model = %provider.model,
            messages = request.messages.len(),
            "Opening LLM stream"
        );

        let (url, body) = match protocol {
            Protocol::Gemini => build_gemini_request(provider, request),
            Protocol::Anthropic => build_anthropic_request(provider, request),
            Protocol::OpenAi => build_openai_request(provider, request),
        };

        let mut http = self
            .inner
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        http = match protocol {
            Protocol::Gemini => http.header("x-goog-api-key", &provider.api_key),
            Protocol::Anthropic => http
                .header("x-api-key", &provider.api_key)
                .header("anthropic-version", "2023-06-01"),
            Protocol::OpenAi => http.header("Authorization", format!("Bearer {}", provider.api_key)),
        };

        let response = http
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Request(e.without_url().to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimitExceeded);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "Provider returned {}: {}",
                status, text
            )));
        }

        let tokens = sse::data_events(response.bytes_stream().map_err(reqwest::Error::without_url))
            .take_while(|event| future::ready(!matches!(event, Ok(data) if data == "[DONE]")))
            .try_filter_map(move |data| future::ready(parse_delta(protocol, &data)))
            .try_filter(|token| future::ready(!token.is_empty()));

        Ok(tokens.boxed())
    }
}

#[async_trait]
impl ChatModel for LlmService {
    /// Open a stream with automatic provider fallback.
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream> {
        if self.inner.providers.is_empty() {
            return Err(Error::NoProviders);
        }

        let mut last_error = None;

        for provider in &self.inner.providers {
            if provider.api_key.is_empty() {
                debug!(provider = %provider.name, "Skipping provider without credentials");
                continue;
            }

            match self.try_provider(provider, &request).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(
                        provider = %provider.name,
                        error = %e,
                        "Provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Llm("All providers failed".to_string())))
    }
}

/// Build request for Gemini streaming API
fn build_gemini_request(provider: &LlmProviderConfig, request: &CompletionRequest) -> (String, Value) {
    let url = format!(
        "{}/models/{}:streamGenerateContent?alt=sse",
        provider.base_url, provider.model
    );

    let contents: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let body = json!({
        "systemInstruction": { "parts": [{ "text": request.system }] },
        "contents": contents,
        "generationConfig": {
            "temperature": request.sampling.temperature,
            "topP": request.sampling.top_p,
            "topK": request.sampling.top_k,
            "maxOutputTokens": request.sampling.max_tokens
        }
    });

    (url, body)
}

/// Build request for OpenAI-compatible APIs (OpenAI, OpenRouter)
fn build_openai_request(provider: &LlmProviderConfig, request: &CompletionRequest) -> (String, Value) {
    let url = format!("{}/chat/completions", provider.base_url);

    let mut messages = vec![json!({ "role": "system", "content": request.system })];
    messages.extend(
        request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content })),
    );

    let mut body = json!({
        "model": provider.model,
        "messages": messages,
        "max_tokens": request.sampling.max_tokens,
        "temperature": request.sampling.temperature,
        "top_p": request.sampling.top_p,
        "stream": true
    });

    // OpenRouter passes top_k through to the models that support it
    if provider.name == "openrouter" {
        body["top_k"] = json!(request.sampling.top_k);
    }

    (url, body)
}

/// Build request for Anthropic Claude API
fn build_anthropic_request(provider: &LlmProviderConfig, request: &CompletionRequest) -> (String, Value) {
    let url = format!("{}/messages", provider.base_url);

    let body = json!({
        "model": provider.model,
        "system": request.system,
        "messages": request.messages,
        "max_tokens": request.sampling.max_tokens,
        "temperature": request.sampling.temperature,
        "top_p": request.sampling.top_p,
        "top_k": request.sampling.top_k,
        "stream": true
    });

    (url, body)
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    delta: Option<OpenAiDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<AnthropicDelta>,
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

/// Extract the text delta from one streamed event, if it carries any.
fn parse_delta(protocol: Protocol, data: &str) -> Result<Option<String>> {
    let parse_err = |e: serde_json::Error| Error::Llm(format!("Failed to parse stream event: {}", e));

    match protocol {
        Protocol::OpenAi => {
            let chunk: OpenAiChunk = serde_json::from_str(data).map_err(parse_err)?;
            if let Some(error) = chunk.error {
                return Err(Error::Llm(error.message));
            }
            Ok(chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.and_then(|d| d.content))
                .reduce(|a, b| a + &b))
        }
        Protocol::Gemini => {
            let chunk: GeminiChunk = serde_json::from_str(data).map_err(parse_err)?;
            if let Some(error) = chunk.error {
                return Err(Error::Llm(error.message));
            }
            Ok(chunk
                .candidates
                .into_iter()
                .filter_map(|c| c.content)
                .flat_map(|c| c.parts)
                .filter_map(|p| p.text)
                .reduce(|a, b| a + &b))
        }
        Protocol::Anthropic => {
            let event: AnthropicEvent = serde_json::from_str(data).map_err(parse_err)?;
            match event.event_type.as_str() {
                "content_block_delta" => Ok(event.delta.and_then(|d| d.text)),
                "error" => Err(Error::Llm(
                    event
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "Unknown provider error".to_string()),
                )),
                _ => Ok(None),
            }
        }
    }
}
