//! LLM Client: the single point of entry for all chat-completion calls in Curveball.
//!
//! ARCHITECTURAL RULE: No other module may call a provider endpoint directly.
//! All LLM interactions go through a `CompletionBackend`, and the HTTP
//! implementation of that trait lives here.
//!
//! Both providers speak the same chat-completions dialect: a POST with a
//! bearer credential, answered either by an SSE stream of deltas or by a
//! single JSON message.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ProviderKind, ResolvedProvider};

pub mod prompts;
pub mod sse;

/// Sampling temperature sent with every analysis request.
pub const TEMPERATURE: f64 = 0.7;

/// Longest slice of a raw error body echoed back to the user.
const MAX_ERROR_DETAIL_CHARS: usize = 800;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{}", api_error_text(.status, .message, .hint))]
    Api {
        status: u16,
        message: String,
        hint: Option<String>,
    },

    #[error("Stream read error: {0}")]
    Stream(String),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

fn api_error_text(status: &u16, message: &str, hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!("{hint} (API request failed ({status}): {message})"),
        None => format!("API request failed ({status}): {message}"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST {base_url}/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// The same request with the streaming flag switched off.
    pub fn non_streaming(&self) -> Self {
        Self {
            stream: false,
            ..self.clone()
        }
    }
}

/// Raw response body chunks, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Bytes, LlmError>>;

// ────────────────────────────────────────────────────────────────────────────
// Backend trait
// ────────────────────────────────────────────────────────────────────────────

/// A chat-completion transport. Implement this to swap the HTTP client for
/// another source of chunks without touching the fetcher.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Issues a streaming request. `Ok(None)` means this transport cannot read
    /// the body incrementally and the caller should fall back to `complete`.
    async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<Option<ChunkStream>, LlmError>;

    /// Issues a non-streaming request and returns `choices[0].message.content`
    /// (empty when the provider sent none).
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, LlmError>;
}

/// Builds the shared HTTP client. The timeout here is the only timeout applied
/// to provider calls.
pub fn build_http_client(timeout_secs: u64) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(2)
        .build()?)
}

/// HTTP implementation of `CompletionBackend` for one resolved provider.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    provider: ResolvedProvider,
}

impl LlmClient {
    pub fn new(client: Client, provider: ResolvedProvider) -> Self {
        Self { client, provider }
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.provider.endpoint)
            .bearer_auth(&self.provider.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} API returned {}: {}", self.provider.kind, status, body);
            return Err(classify_api_error(
                self.provider.kind,
                status.as_u16(),
                &body,
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<Option<ChunkStream>, LlmError> {
        if !self.provider.streaming {
            debug!("{} is configured for non-streaming mode", self.provider.kind);
            return Ok(None);
        }

        let response = self.send(request).await?;

        // A provider that ignores `stream: true` answers with a plain JSON body.
        let is_plain_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_plain_json {
            warn!(
                "{} answered a streaming request with application/json; streaming unavailable",
                self.provider.kind
            );
            return Ok(None);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| LlmError::Stream(e.to_string())))
            .boxed();
        Ok(Some(stream))
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, LlmError> {
        let response = self.send(request).await?;
        let body: Value = response.json().await?;
        Ok(message_content(&body).unwrap_or_default().to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Response shape helpers
// ────────────────────────────────────────────────────────────────────────────

/// Text carried by one streamed payload: `choices[0].delta.content` when it is
/// a string, otherwise the non-streaming `choices[0].message.content`.
pub fn delta_text(payload: &Value) -> Option<&str> {
    match payload.pointer("/choices/0/delta/content") {
        Some(Value::String(text)) => Some(text.as_str()),
        _ => message_content(payload),
    }
}

/// `choices[0].message.content` of a non-streaming response.
pub fn message_content(payload: &Value) -> Option<&str> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
}

/// Pulls a human-readable message out of a provider error body:
/// `error.message`, then `message`, then the raw body, then "unknown error".
pub fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| json.get("message").and_then(Value::as_str))
            .or_else(|| json.get("error").and_then(Value::as_str))
            .filter(|m| !m.trim().is_empty());
        return message
            .map(str::to_string)
            .unwrap_or_else(|| "unknown error".to_string());
    }

    let detail: String = body.trim().chars().take(MAX_ERROR_DETAIL_CHARS).collect();
    if detail.is_empty() {
        "unknown error".to_string()
    } else {
        detail
    }
}

/// Turns a non-success response into an `LlmError::Api`, layering in a
/// provider-specific remediation hint when a known pattern is recognized.
/// Classification only; nothing here retries.
pub fn classify_api_error(provider: ProviderKind, status: u16, body: &str) -> LlmError {
    let message = extract_error_message(body);
    let lower = message.to_lowercase();

    let hint = if status == 404 && lower.contains("not activated the model") {
        Some(match provider {
            ProviderKind::Volcengine => "The model is not activated for this account. Activate it \
                 in the Ark console, switch VOLCENGINE_MODEL to an activated model, or use an \
                 existing endpoint via VOLCENGINE_ENDPOINT_ID."
                .to_string(),
            ProviderKind::OpenAi => {
                "The model is not available to this account. Check OPENAI_MODEL.".to_string()
            }
        })
    } else if status == 401
        || status == 403
        || lower.contains("api key")
        || lower.contains("apikey")
        || lower.contains("authentication")
        || lower.contains("unauthorized")
    {
        Some(match provider {
            ProviderKind::Volcengine => {
                "The API key was rejected. Check VOLCENGINE_API_KEY.".to_string()
            }
            ProviderKind::OpenAi => "The API key was rejected. Check OPENAI_API_KEY.".to_string(),
        })
    } else if status == 429 || lower.contains("rate limit") || lower.contains("quota") {
        Some("Rate limit or quota reached. Wait a moment and submit again.".to_string())
    } else {
        None
    };

    LlmError::Api {
        status,
        message,
        hint,
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
