// src/provider/anthropic.rs — Anthropic Messages API provider

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};

use super::{map_sse_error, ChatChunk, ChatRequest, ChatStream, ModelProvider, TokenUsage};
use crate::infra::errors::RiffError;

const PROVIDER_ID: &str = "anthropic";

pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self) -> &str {
        "https://api.anthropic.com/v1/messages"
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(2048),
            "stream": true,
        });

        if let Some(system) = &request.system {
            body["system"] = serde_json::json!([{
                "type": "text",
                "text": system,
                "cache_control": { "type": "ephemeral" }
            }]);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, RiffError> {
        let body = self.build_request_body(&request);

        let request_builder = self
            .client
            .post(self.api_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
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

                        match parsed["type"].as_str().unwrap_or("") {
                            "content_block_delta" => {
                                if parsed["delta"]["type"] == "text_delta" {
                                    let text = parsed["delta"]["text"].as_str().unwrap_or("");
                                    if !text.is_empty() {
                                        yield Ok(ChatChunk::text(text));
                                    }
                                }
                            }
                            "message_start" => {
                                let input_tokens = parsed["message"]["usage"]["input_tokens"]
                                    .as_u64()
                                    .unwrap_or(0) as u32;
                                if input_tokens > 0 {
                                    yield Ok(ChatChunk {
                                        delta: String::new(),
                                        usage: Some(TokenUsage { input_tokens, output_tokens: 0 }),
                                    });
                                }
                            }
                            "message_delta" => {
                                let output_tokens = parsed["usage"]["output_tokens"]
                                    .as_u64()
                                    .unwrap_or(0) as u32;
                                if output_tokens > 0 {
                                    yield Ok(ChatChunk {
                                        delta: String::new(),
                                        usage: Some(TokenUsage { input_tokens: 0, output_tokens }),
                                    });
                                }
                            }
                            "error" => {
                                let message = parsed["error"]["message"]
                                    .as_str()
                                    .unwrap_or("unknown error")
                                    .to_string();
                                yield Err(RiffError::Provider {
                                    provider: PROVIDER_ID.into(),
                                    message,
                                });
                                break;
                            }
                            "message_stop" => break,
                            _ => {} // ping, content_block_start/stop
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
