use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const VOLCENGINE_DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Application configuration loaded from environment variables.
///
/// Provider credentials are optional here: a missing key or model is reported
/// as a validation error when an analysis is requested, not at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub default_provider: ProviderKind,
    pub request_timeout_secs: u64,
    /// Idle time after which a session is dropped.
    pub session_ttl_secs: u64,
    /// Most sessions held at once.
    pub session_capacity: u64,
    pub volcengine: ProviderConfig,
    pub openai: ProviderConfig,
}

/// The two interchangeable chat-completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Volcengine,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Volcengine, ProviderKind::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Volcengine => "volcengine",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "volcengine" | "ark" => Some(ProviderKind::Volcengine),
            "openai" => Some(ProviderKind::OpenAi),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw provider settings as read from the environment.
#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub streaming: bool,
}

// Hand-written so the credential never reaches the logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// A provider whose credential and model have both been resolved.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub streaming: bool,
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// Checks that a credential and model identifier are present.
    /// Failing here means no network call is made.
    pub fn resolve(&self) -> Result<ResolvedProvider, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Validation(self.missing_key_message()))?;

        let model = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| AppError::Validation(self.missing_model_message()))?;

        Ok(ResolvedProvider {
            kind: self.kind,
            endpoint: format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            streaming: self.streaming,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.resolve().is_ok()
    }

    fn missing_key_message(&self) -> String {
        match self.kind {
            ProviderKind::Volcengine => {
                "Volcengine API key is not configured. Set VOLCENGINE_API_KEY.".to_string()
            }
            ProviderKind::OpenAi => {
                "OpenAI API key is not configured. Set OPENAI_API_KEY.".to_string()
            }
        }
    }

    fn missing_model_message(&self) -> String {
        match self.kind {
            ProviderKind::Volcengine => "No Volcengine model is configured. Set VOLCENGINE_MODEL \
                 (model id) or VOLCENGINE_ENDPOINT_ID (endpoint id)."
                .to_string(),
            ProviderKind::OpenAi => "No OpenAI model is configured. Set OPENAI_MODEL.".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let default_provider = match optional_env("DEFAULT_PROVIDER") {
            Some(value) => ProviderKind::parse(&value).with_context(|| {
                format!("DEFAULT_PROVIDER must be 'volcengine' or 'openai', got '{value}'")
            })?,
            None => ProviderKind::Volcengine,
        };

        // An endpoint id takes precedence over a plain model id.
        let volcengine_model =
            optional_env("VOLCENGINE_ENDPOINT_ID").or_else(|| optional_env("VOLCENGINE_MODEL"));

        Ok(Config {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            default_provider,
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse::<u64>()
                .context("REQUEST_TIMEOUT_SECS must be a whole number of seconds")?,
            session_ttl_secs: std::env::var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse::<u64>()
                .context("SESSION_TTL_SECS must be a whole number of seconds")?,
            session_capacity: std::env::var("SESSION_CAPACITY")
                .unwrap_or_else(|_| "10000".to_string())
                .parse::<u64>()
                .context("SESSION_CAPACITY must be a whole number")?,
            volcengine: ProviderConfig {
                kind: ProviderKind::Volcengine,
                base_url: optional_env("VOLCENGINE_BASE_URL")
                    .unwrap_or_else(|| VOLCENGINE_DEFAULT_BASE_URL.to_string()),
                api_key: optional_env("VOLCENGINE_API_KEY"),
                model: volcengine_model,
                streaming: bool_env("VOLCENGINE_STREAMING", true)?,
            },
            openai: ProviderConfig {
                kind: ProviderKind::OpenAi,
                base_url: optional_env("OPENAI_BASE_URL")
                    .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string()),
                api_key: optional_env("OPENAI_API_KEY"),
                model: optional_env("OPENAI_MODEL"),
                streaming: bool_env("OPENAI_STREAMING", true)?,
            },
        })
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Volcengine => &self.volcengine,
            ProviderKind::OpenAi => &self.openai,
        }
    }
}

/// Returns the variable's value, treating unset and blank the same.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bool_env(key: &str, default: bool) -> Result<bool> {
    match optional_env(key) {
        None => Ok(default),
        Some(v) => parse_bool(&v)
            .with_context(|| format!("Environment variable '{key}' must be true or false")),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
