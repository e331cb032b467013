// src/provider/mod.rs — Chat completion transport layer

pub mod anthropic;
pub mod openai;
pub mod resolver;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::core::types::Role;
use crate::infra::errors::RiffError;

/// Ordered text fragments of one streamed reply.
///
/// Dropping the stream abandons the underlying HTTP request.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, RiffError>> + Send>>;

/// Core trait that all model providers implement.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, RiffError>;
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatChunk {
    pub delta: String,
    pub usage: Option<TokenUsage>,
}

impl ChatChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            usage: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Reference to a specific model on a specific provider.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse "provider/model" format
    pub fn parse(s: &str) -> Option<Self> {
        let (provider, model) = s.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Translate an SSE failure into the categorized transport error.
pub(crate) async fn map_sse_error(provider: &str, err: reqwest_eventsource::Error) -> RiffError {
    use reqwest_eventsource::Error as SseError;

    match err {
        SseError::InvalidStatusCode(status, response) => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            status_error(provider, status, retry_after_secs, &body)
        }
        SseError::Transport(e) if e.is_connect() || e.is_timeout() => RiffError::Connection {
            provider: provider.into(),
            message: e.to_string(),
        },
        other => RiffError::Provider {
            provider: provider.into(),
            message: format!("SSE stream error: {}", other),
        },
    }
}

/// Map an HTTP status to an error category.
pub(crate) fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> RiffError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => RiffError::Auth {
            provider: provider.into(),
            message: format!("HTTP {}: {}", status, body),
        },
        reqwest::StatusCode::TOO_MANY_REQUESTS => RiffError::RateLimited {
            provider: provider.into(),
            retry_after_ms: retry_after_secs.unwrap_or(5) * 1000,
        },
        _ => RiffError::Provider {
            provider: provider.into(),
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
