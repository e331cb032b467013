// src/core/conversation.rs — Streaming conversation controller
//
// Owns the message history, streams one assistant reply per user turn, and
// guarantees at most one request in flight. Observers follow the conversation
// through a watch channel that is republished after every delta.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::extractor::{PatternExtractor, DEFAULT_LANGUAGES};
use super::types::{ConversationState, Message};
use crate::infra::errors::RiffError;
use crate::provider::{ChatMessage, ChatRequest, ModelProvider};

/// Final content of a reply cancelled before any text arrived.
pub const CANCELLED_MARKER: &str = "(cancelled)";

/// How a turn's stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Rejected: another reply was still streaming. Nothing was recorded.
    Busy,
    Completed,
    Cancelled,
    /// Transport failure; the reply content holds the error text.
    Failed,
}

/// Result of `send_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub outcome: StreamOutcome,
    /// Pattern extracted from the finalized reply.
    pub pattern: Option<String>,
}

impl TurnReply {
    fn busy() -> Self {
        Self {
            outcome: StreamOutcome::Busy,
            pattern: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.outcome == StreamOutcome::Busy
    }
}

/// Request parameters fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Fence tags the extractor accepts.
    pub languages: Vec<String>,
}

impl ConversationSettings {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            max_tokens: 2048,
            temperature: None,
            languages: DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

enum StreamEnd {
    Completed,
    Cancelled,
    Failed(RiffError),
}

pub struct ConversationController {
    provider: Arc<dyn ModelProvider>,
    settings: ConversationSettings,
    extractor: PatternExtractor,
    busy: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    state: watch::Sender<ConversationState>,
}

impl ConversationController {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: ConversationSettings) -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        let extractor = PatternExtractor::new(&settings.languages);
        Self {
            provider,
            settings,
            extractor,
            busy: AtomicBool::new(false),
            cancel: Mutex::new(None),
            state,
        }
    }

    /// Follow the conversation. The receiver sees a new value after every delta.
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Finalized messages in insertion order.
    pub fn messages(&self) -> Vec<Message> {
        self.state.borrow().messages.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Ask the in-flight request to stop. Returns immediately; the turn
    /// finishes on its own once it observes the signal.
    pub fn cancel(&self) -> bool {
        match self.cancel_slot().as_ref() {
            Some(token) => {
                tracing::debug!("Cancelling in-flight reply");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one turn: record `text`, stream the reply, and return the pattern
    /// found in it. Returns a busy reply immediately when a turn is already
    /// in flight; it is never queued.
    pub async fn send_message(&self, text: &str) -> TurnReply {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Turn rejected: a reply is already streaming");
            return TurnReply::busy();
        }
        let token = CancellationToken::new();
        *self.cancel_slot() = Some(token.clone());
        let _guard = TurnGuard { controller: self };

        self.state.send_modify(|s| {
            s.messages.push(Message::user(text));
            s.in_flight = Some(Message::assistant_placeholder());
        });
        let request = self.build_request();

        let end = self.stream_reply(request, &token).await;
        let outcome = match &end {
            StreamEnd::Completed => StreamOutcome::Completed,
            StreamEnd::Cancelled => StreamOutcome::Cancelled,
            StreamEnd::Failed(_) => StreamOutcome::Failed,
        };
        let pattern = self.finalize(end);

        tracing::info!(
            outcome = ?outcome,
            has_pattern = pattern.is_some(),
            "Reply finished"
        );
        TurnReply { outcome, pattern }
    }

    fn build_request(&self) -> ChatRequest {
        let messages = self
            .state
            .borrow()
            .messages
            .iter()
            // Providers reject empty turns; an empty reply carries no context anyway.
            .filter(|m| !m.content.is_empty())
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        ChatRequest {
            model: self.settings.model.clone(),
            messages,
            max_tokens: Some(self.settings.max_tokens),
            temperature: self.settings.temperature,
            system: Some(self.settings.system_prompt.clone()),
        }
    }

    async fn stream_reply(&self, request: ChatRequest, token: &CancellationToken) -> StreamEnd {
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return StreamEnd::Cancelled,
            opened = self.provider.chat_stream(request) => match opened {
                Ok(stream) => stream,
                Err(e) => return StreamEnd::Failed(e),
            },
        };

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        if let Some(usage) = chunk.usage {
                            tracing::debug!(
                                input_tokens = usage.input_tokens,
                                output_tokens = usage.output_tokens,
                                "Token usage"
                            );
                        }
                        if !chunk.delta.is_empty() {
                            self.state.send_modify(|s| {
                                if let Some(m) = s.in_flight.as_mut() {
                                    m.content.push_str(&chunk.delta);
                                }
                            });
                        }
                    }
                    Some(Err(_)) if token.is_cancelled() => return StreamEnd::Cancelled,
                    Some(Err(e)) => return StreamEnd::Failed(e),
                    None => return StreamEnd::Completed,
                },
            }
        }
    }

    /// Fix the in-flight reply's content, move it into the history, and
    /// return its pattern.
    fn finalize(&self, end: StreamEnd) -> Option<String> {
        let mut pattern = None;
        self.state.send_modify(|s| {
            let Some(mut msg) = s.in_flight.take() else {
                return;
            };
            match end {
                StreamEnd::Completed => {}
                StreamEnd::Cancelled => {
                    tracing::info!(chars = msg.content.len(), "Reply cancelled");
                    if msg.content.is_empty() {
                        msg.content = CANCELLED_MARKER.to_string();
                    }
                }
                StreamEnd::Failed(ref e) => {
                    tracing::warn!(error = %e, transient = e.is_transient(), "Reply failed");
                    msg.content = e.user_message();
                }
            }
            msg.pattern = self.extractor.extract(&msg.content);
            pattern = msg.pattern.clone();
            s.messages.push(msg);
        });
        pattern
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases the single-flight guard when a turn ends, including when the
/// turn's future is dropped before it finishes.
struct TurnGuard<'a> {
    controller: &'a ConversationController,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let c = self.controller;
        // Dropped mid-stream: keep the partial reply as a cancelled one.
        if c.state.borrow().in_flight.is_some() {
            c.finalize(StreamEnd::Cancelled);
        }
        *c.cancel_slot() = None;
        c.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatChunk, ChatStream};
    use async_trait::async_trait;

    /// Replies with fixed chunks, or fails before streaming when `error` is set.
    struct CannedProvider {
        chunks: Vec<&'static str>,
        error: bool,
    }

    #[async_trait]
    impl ModelProvider for CannedProvider {
        fn id(&self) -> &str {
            "canned"
        }

        fn name(&self) -> &str {
            "Canned"
        }

        async fn chat_stream(&self, _request: ChatRequest) -> Result<ChatStream, RiffError> {
            if self.error {
                return Err(RiffError::Auth {
                    provider: "canned".into(),
                    message: "HTTP 401".into(),
                });
            }
            let chunks: Vec<Result<ChatChunk, RiffError>> =
                self.chunks.iter().map(|c| Ok(ChatChunk::text(*c))).collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn controller(chunks: Vec<&'static str>, error: bool) -> ConversationController {
        ConversationController::new(
            Arc::new(CannedProvider { chunks, error }),
            ConversationSettings::new("m", "sys"),
        )
    }

    #[tokio::test]
    async fn test_completed_turn_records_both_messages() {
        let c = controller(vec!["Here:\n```strudel\n", "s(\"bd\")\n", "```"], false);
        let reply = c.send_message("kick drum").await;

        assert_eq!(reply.outcome, StreamOutcome::Completed);
        assert_eq!(reply.pattern.as_deref(), Some("s(\"bd\")"));

        let messages = c.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "kick drum");
        assert_eq!(messages[1].content, "Here:\n```strudel\ns(\"bd\")\n```");
        assert_eq!(messages[1].pattern.as_deref(), Some("s(\"bd\")"));
        assert!(!c.is_busy());
        assert!(!c.snapshot().is_streaming());
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error_content() {
        let c = controller(vec![], true);
        let reply = c.send_message("hi").await;

        assert_eq!(reply.outcome, StreamOutcome::Failed);
        assert!(reply.pattern.is_none());
        let last = c.messages().pop().unwrap();
        assert!(last.content.starts_with("Error: authentication"));
        assert!(!c.is_busy());
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let c = controller(vec![], false);
        assert!(!c.cancel());
    }

    #[tokio::test]
    async fn test_request_includes_history_in_order() {
        let c = controller(vec!["ok"], false);
        c.send_message("one").await;
        c.send_message("two").await;
        let req = c.build_request();
        let contents: Vec<&str> = req.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "ok", "two", "ok"]);
        assert_eq!(req.system.as_deref(), Some("sys"));
    }

    #[tokio::test]
    async fn test_empty_reply_excluded_from_next_request() {
        let c = controller(vec![], false);
        let reply = c.send_message("one").await;
        assert_eq!(reply.outcome, StreamOutcome::Completed);
        assert_eq!(c.messages()[1].content, "");

        let req = c.build_request();
        assert_eq!(req.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_request_carries_sampling_settings() {
        let mut settings = ConversationSettings::new("m", "sys");
        settings.max_tokens = 512;
        settings.temperature = Some(0.4);
        let c = ConversationController::new(
            Arc::new(CannedProvider {
                chunks: vec![],
                error: false,
            }),
            settings,
        );

        let req = c.build_request();
        assert_eq!(req.max_tokens, Some(512));
        assert_eq!(req.temperature, Some(0.4));
        assert_eq!(controller(vec![], false).build_request().temperature, None);
    }
}
