// src/provider/openai.rs — OpenAI-compatible Chat Completions provider

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};

use super::{map_sse_error, ChatChunk, ChatRequest, ChatStream, ModelProvider, TokenUsage};
use crate::infra::errors::RiffError;

const PROVIDER_ID: &str = "openai";

pub struct OpenAIProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1".into())
    }

    /// Point at any server speaking the Chat Completions protocol
    /// (Ollama, vLLM, OpenRouter, ...).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            messages.push(serde_json::json!({"role": m.role.to_string(), "content": m.content}));
        }

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, RiffError> {
        let body = self.build_request_body(&request);

        let request_builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let mut es = request_builder.eventsource().map_err(|e| RiffError::Provider {
            provider: PROVIDER_ID.into(),
            message: format!("Failed to open event stream: {}", e),
        })?;

        let stream = async_stream::stream! {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {},
                    Ok(Event::Message(msg)) => {
                        if msg.data == "[DONE]" {
                            break;
                        }
                        let parsed: serde_json::Value = match serde_json::from_str(&msg.data) {
                            Ok(v) => v,
                            Err(e) => {
                                yield Err(RiffError::Provider {
                                    provider: PROVIDER_ID.into(),
                                    message: format!("Failed to parse SSE data: {}", e),
                                });
                                break;
                            }
                        };

                        let delta = parsed["choices"][0]["delta"]["content"]
                            .as_str()
                            .unwrap_or("")
                            .to_string();

                        // Sent in the final chunk when stream_options.include_usage is true
                        let usage = parsed["usage"].is_object().then(|| TokenUsage {
                            input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                            output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
                        });

                        if !delta.is_empty() || usage.is_some() {
                            yield Ok(ChatChunk { delta, usage });
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(map_sse_error(PROVIDER_ID, e).await);
                        break;
                    }
                }
            }
            es.close();
        };

        Ok(Box::pin(stream))
    }
}
