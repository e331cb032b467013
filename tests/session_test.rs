// tests/session_test.rs — Integration test: conversation, player and correction loop with mocks

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, oneshot};

use riff::core::conversation::{
    ConversationController, ConversationSettings, StreamOutcome, CANCELLED_MARKER,
};
use riff::core::feedback::build_retry_message;
use riff::core::orchestrator::{Orchestrator, RetryPolicy, TurnOutcome};
use riff::core::types::{PlaybackState, Role};
use riff::infra::errors::RiffError;
use riff::player::{EvalEndpoint, EvalResult, Player};
use riff::provider::*;

/// One scripted model reply.
enum Reply {
    Text(String),
    /// Deltas arrive as the test sends them; the reply ends when the sender drops.
    Gated(mpsc::UnboundedReceiver<String>),
    Fail(RiffError),
}

/// A mock provider that plays back scripted replies without any network calls.
#[derive(Default)]
struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn with(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        "Mock Provider"
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, RiffError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Text(String::new()));

        match reply {
            Reply::Text(text) => {
                // Split into a few deltas like a real stream.
                let chunks: Vec<Result<ChatChunk, RiffError>> = text
                    .split_inclusive('\n')
                    .map(|piece| Ok(ChatChunk::text(piece)))
                    .collect();
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            Reply::Gated(rx) => Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|d| (Ok(ChatChunk::text(d)), rx))
            }))),
            Reply::Fail(e) => Err(e),
        }
    }
}

fn fenced(code: &str) -> Reply {
    Reply::Text(format!("Try this:\n```strudel\n{code}\n```\nEnjoy."))
}

/// A mock audio engine with scripted evaluation results.
struct ScriptedEndpoint {
    results: Mutex<VecDeque<Result<EvalResult, RiffError>>>,
    evaluated: Mutex<Vec<String>>,
    fail_stop: bool,
}

impl ScriptedEndpoint {
    fn with(results: Vec<Result<EvalResult, RiffError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            evaluated: Mutex::new(Vec::new()),
            fail_stop: false,
        })
    }

    fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvalEndpoint for ScriptedEndpoint {
    async fn is_ready(&self) -> Result<bool, RiffError> {
        Ok(true)
    }

    async fn evaluate(&self, code: &str) -> Result<EvalResult, RiffError> {
        self.evaluated.lock().unwrap().push(code.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(EvalResult::failed("ReferenceError: always broken")))
    }

    async fn stop(&self) -> Result<EvalResult, RiffError> {
        if self.fail_stop {
            Err(RiffError::Endpoint("engine crashed".into()))
        } else {
            Ok(EvalResult::ok())
        }
    }

    async fn close(&self) -> Result<(), RiffError> {
        Ok(())
    }
}

fn controller(provider: Arc<ScriptedProvider>) -> Arc<ConversationController> {
    Arc::new(ConversationController::new(
        provider,
        ConversationSettings::new("mock-model", "You write Strudel."),
    ))
}

async fn ready_player(endpoint: Arc<ScriptedEndpoint>) -> Arc<Player> {
    let player = Arc::new(Player::new());
    player
        .init(endpoint, Duration::from_secs(1), Duration::from_millis(1))
        .await
        .unwrap();
    player
}

// ─── Conversation controller ────────────────────────────────────

#[tokio::test]
async fn test_second_send_while_streaming_is_rejected() {
    let (tx, rx) = mpsc::unbounded_channel();
    let provider = ScriptedProvider::with(vec![Reply::Gated(rx)]);
    let c = controller(provider.clone());
    let mut state = c.subscribe();

    let first = tokio::spawn({
        let c = c.clone();
        async move { c.send_message("one").await }
    });

    tx.send("a".into()).unwrap();
    state.wait_for(|s| s.streaming_text() == "a").await.unwrap();

    let second = c.send_message("two").await;
    assert!(second.is_busy());
    assert!(second.pattern.is_none());

    // The first turn is untouched.
    let snapshot = c.snapshot();
    assert_eq!(snapshot.streaming_text(), "a");
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content, "one");
    assert_eq!(provider.requests().len(), 1);

    drop(tx);
    let reply = first.await.unwrap();
    assert_eq!(reply.outcome, StreamOutcome::Completed);
    assert_eq!(c.messages().len(), 2);
    assert!(!c.is_busy());
}

#[tokio::test]
async fn test_cancel_keeps_partial_text() {
    let (tx, rx) = mpsc::unbounded_channel();
    let c = controller(ScriptedProvider::with(vec![Reply::Gated(rx)]));
    let mut state = c.subscribe();

    let turn = tokio::spawn({
        let c = c.clone();
        async move { c.send_message("go").await }
    });

    tx.send("a".into()).unwrap();
    tx.send("b".into()).unwrap();
    state.wait_for(|s| s.streaming_text() == "ab").await.unwrap();
    assert!(c.cancel());

    let reply = turn.await.unwrap();
    assert_eq!(reply.outcome, StreamOutcome::Cancelled);
    let last = c.messages().pop().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "ab");
    assert!(!c.is_busy());

    // Nothing published after the cancel is observed.
    tx.send("c".into()).ok();
    assert_eq!(c.messages().last().unwrap().content, "ab");
}

#[tokio::test]
async fn test_cancel_before_any_text_uses_marker() {
    let (_tx, rx) = mpsc::unbounded_channel::<String>();
    let c = controller(ScriptedProvider::with(vec![Reply::Gated(rx)]));
    let mut state = c.subscribe();

    let turn = tokio::spawn({
        let c = c.clone();
        async move { c.send_message("go").await }
    });

    state.wait_for(|s| s.is_streaming()).await.unwrap();
    assert!(c.cancel());

    let reply = turn.await.unwrap();
    assert_eq!(reply.outcome, StreamOutcome::Cancelled);
    assert_eq!(c.messages()[1].content, CANCELLED_MARKER);
}

#[tokio::test]
async fn test_every_delta_is_published() {
    let (tx, rx) = mpsc::unbounded_channel();
    let c = controller(ScriptedProvider::with(vec![Reply::Gated(rx)]));
    let mut state = c.subscribe();

    let turn = tokio::spawn({
        let c = c.clone();
        async move { c.send_message("go").await }
    });

    let mut seen = Vec::new();
    for delta in ["s(", "\"bd", "\")"] {
        tx.send(delta.into()).unwrap();
        let text = state
            .wait_for(|s| s.streaming_text().ends_with(delta))
            .await
            .unwrap()
            .streaming_text()
            .to_string();
        seen.push(text);
    }
    drop(tx);
    turn.await.unwrap();

    assert_eq!(seen, vec!["s(", "s(\"bd", "s(\"bd\")"]);
}

#[tokio::test]
async fn test_transport_failure_is_a_terminal_message() {
    let c = controller(ScriptedProvider::with(vec![Reply::Fail(RiffError::RateLimited {
        provider: "mock".into(),
        retry_after_ms: 3000,
    })]));

    let reply = c.send_message("go").await;
    assert_eq!(reply.outcome, StreamOutcome::Failed);
    assert!(reply.pattern.is_none());

    let last = c.messages().pop().unwrap();
    assert_eq!(
        last.content,
        "Error: mock is rate limiting requests. Try again in 3s."
    );
}

#[tokio::test]
async fn test_pattern_recorded_on_message() {
    let c = controller(ScriptedProvider::with(vec![fenced("s(\"bd*4\")")]));
    let reply = c.send_message("four on the floor").await;
    assert_eq!(reply.pattern.as_deref(), Some("s(\"bd*4\")"));
    assert_eq!(c.messages()[1].pattern.as_deref(), Some("s(\"bd*4\")"));
    assert!(c.messages()[0].pattern.is_none());
}

// ─── Correction loop ────────────────────────────────────────────

#[tokio::test]
async fn test_retry_bound_stops_after_budget() {
    let provider = ScriptedProvider::with(vec![
        fenced("bad(0)"),
        fenced("bad(1)"),
        fenced("bad(2)"),
        fenced("never(3)"),
    ]);
    let endpoint = ScriptedEndpoint::with(vec![]);
    let player = ready_player(endpoint.clone()).await;
    let orch = Orchestrator::new(controller(provider.clone()), player.clone(), RetryPolicy::default());

    let summary = orch.handle_turn("make a beat").await;

    assert_eq!(summary.corrections, 2);
    assert_eq!(
        summary.outcome,
        TurnOutcome::GaveUp {
            last_code: "bad(2)".into(),
            last_error: "ReferenceError: always broken".into(),
        }
    );
    assert_eq!(endpoint.evaluated(), vec!["bad(0)", "bad(1)", "bad(2)"]);
    assert_eq!(provider.requests().len(), 3);

    let status = player.status();
    assert_eq!(status.state, PlaybackState::Error);
    assert_eq!(status.last_attempted.as_deref(), Some("bad(2)"));
    assert!(status.current_pattern.is_none());
    assert_eq!(status.error.as_deref(), Some("ReferenceError: always broken"));
}

#[tokio::test]
async fn test_retry_success_after_one_correction() {
    let provider = ScriptedProvider::with(vec![fenced("s(\"bd\").oops()"), fenced("s(\"bd\")")]);
    let endpoint = ScriptedEndpoint::with(vec![
        Ok(EvalResult::failed("oops is not a function")),
        Ok(EvalResult::ok()),
    ]);
    let player = ready_player(endpoint.clone()).await;
    let orch = Orchestrator::new(controller(provider.clone()), player.clone(), RetryPolicy::default());

    let summary = orch.handle_turn("kick").await;

    assert_eq!(summary.corrections, 1);
    assert_eq!(
        summary.outcome,
        TurnOutcome::Played {
            pattern: "s(\"bd\")".into()
        }
    );
    let status = player.status();
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.current_pattern.as_deref(), Some("s(\"bd\")"));
    assert!(status.error.is_none());

    // The correction request went out as a user turn after the failed reply.
    let second = &provider.requests()[1];
    let last = second.messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert_eq!(
        last.content,
        build_retry_message("s(\"bd\").oops()", "oops is not a function")
    );
    assert_eq!(second.messages.len(), 3);
}

#[tokio::test]
async fn test_feedback_embeds_code_and_error_verbatim() {
    let code = "s('bd').```weird```";
    let error = "Unexpected token```";
    let msg = build_retry_message(code, error);
    assert!(msg.contains(code));
    assert!(msg.contains(error));

    // Same guarantee through the loop, for the error reported by the engine.
    let provider = ScriptedProvider::with(vec![fenced("s('bd')"), Reply::Text("no idea".into())]);
    let endpoint = ScriptedEndpoint::with(vec![Ok(EvalResult::failed(error))]);
    let player = ready_player(endpoint).await;
    let orch = Orchestrator::new(controller(provider.clone()), player, RetryPolicy::default());
    orch.handle_turn("go").await;

    let requests = provider.requests();
    let sent = &requests[1].messages.last().unwrap().content;
    assert!(sent.contains(error));
    assert!(sent.contains("s('bd')"));
}

#[tokio::test]
async fn test_no_pattern_ends_turn_without_evaluation() {
    let provider = ScriptedProvider::with(vec![Reply::Text(
        "What mood are you after?\n```\ns(\"bd\")\n```".into(),
    )]);
    let endpoint = ScriptedEndpoint::with(vec![]);
    let player = ready_player(endpoint.clone()).await;
    let orch = Orchestrator::new(controller(provider.clone()), player.clone(), RetryPolicy::default());

    let summary = orch.handle_turn("music").await;

    assert_eq!(summary.outcome, TurnOutcome::NoPattern);
    assert_eq!(summary.corrections, 0);
    assert!(endpoint.evaluated().is_empty());
    assert_eq!(player.state(), PlaybackState::Stopped);
}

#[tokio::test]
async fn test_correction_without_pattern_abandons() {
    let provider = ScriptedProvider::with(vec![fenced("bad()"), Reply::Text("Sorry!".into())]);
    let endpoint = ScriptedEndpoint::with(vec![Ok(EvalResult::failed("bad is not defined"))]);
    let player = ready_player(endpoint.clone()).await;
    let orch = Orchestrator::new(controller(provider.clone()), player.clone(), RetryPolicy::default());

    let summary = orch.handle_turn("go").await;

    assert_eq!(summary.corrections, 1);
    assert_eq!(
        summary.outcome,
        TurnOutcome::CorrectionAbandoned {
            last_error: "bad is not defined".into()
        }
    );
    assert_eq!(endpoint.evaluated().len(), 1);
    // Last failure stays visible.
    assert_eq!(player.state(), PlaybackState::Error);
}

#[tokio::test]
async fn test_engine_not_ready_skips_corrections() {
    let provider = ScriptedProvider::with(vec![fenced("s(\"bd\")")]);
    let player = Arc::new(Player::new());
    let orch = Orchestrator::new(controller(provider.clone()), player.clone(), RetryPolicy::default());

    let summary = orch.handle_turn("go").await;

    assert_eq!(summary.outcome, TurnOutcome::EndpointNotReady);
    assert_eq!(summary.corrections, 0);
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(player.state(), PlaybackState::Error);
}

#[tokio::test]
async fn test_engine_dying_mid_loop_stops_retrying() {
    let provider = ScriptedProvider::with(vec![fenced("a()"), fenced("b()")]);
    let endpoint = ScriptedEndpoint::with(vec![
        Ok(EvalResult::failed("a is not defined")),
        Err(RiffError::EndpointNotReady),
    ]);
    let player = ready_player(endpoint.clone()).await;
    let orch = Orchestrator::new(controller(provider.clone()), player, RetryPolicy::default());

    let summary = orch.handle_turn("go").await;

    assert_eq!(summary.outcome, TurnOutcome::EndpointNotReady);
    assert_eq!(summary.corrections, 1);
    assert_eq!(provider.requests().len(), 2);
}

#[tokio::test]
async fn test_engine_protocol_error_is_not_sent_back_as_code_error() {
    let provider = ScriptedProvider::with(vec![fenced("s(\"bd\")"), fenced("s(\"sd\")")]);
    let endpoint = ScriptedEndpoint::with(vec![Err(RiffError::Endpoint("Method not found".into()))]);
    let player = ready_player(endpoint.clone()).await;
    let orch = Orchestrator::new(controller(provider.clone()), player.clone(), RetryPolicy::default());

    let summary = orch.handle_turn("go").await;

    assert_eq!(
        summary.outcome,
        TurnOutcome::EngineFault {
            error: "Audio engine error: Method not found".into()
        }
    );
    assert_eq!(summary.corrections, 0);
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(endpoint.evaluated().len(), 1);

    let status = player.status();
    assert_eq!(status.state, PlaybackState::Error);
    assert_eq!(status.error.as_deref(), Some("Audio engine error: Method not found"));
}

#[tokio::test]
async fn test_malformed_engine_reply_ends_correction_loop() {
    let malformed = serde_json::from_str::<EvalResult>("{\"status\": 1}").unwrap_err();
    let provider = ScriptedProvider::with(vec![fenced("a()"), fenced("b()")]);
    let endpoint = ScriptedEndpoint::with(vec![
        Ok(EvalResult::failed("a is not defined")),
        Err(RiffError::Json(malformed)),
    ]);
    let player = ready_player(endpoint.clone()).await;
    let orch = Orchestrator::new(controller(provider.clone()), player, RetryPolicy::default());

    let summary = orch.handle_turn("go").await;

    assert!(matches!(summary.outcome, TurnOutcome::EngineFault { .. }));
    assert_eq!(summary.corrections, 1);
    assert_eq!(provider.requests().len(), 2);
    assert_eq!(endpoint.evaluated(), vec!["a()".to_string(), "b()".to_string()]);
}

#[tokio::test]
async fn test_busy_turn_is_reported() {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let provider = ScriptedProvider::with(vec![Reply::Gated(rx)]);
    let c = controller(provider);
    let orch = Orchestrator::new(c.clone(), Arc::new(Player::new()), RetryPolicy::default());
    let mut state = c.subscribe();

    let first = tokio::spawn({
        let c = c.clone();
        async move { c.send_message("one").await }
    });
    state.wait_for(|s| s.is_streaming()).await.unwrap();

    let summary = orch.handle_turn("two").await;
    assert_eq!(summary.outcome, TurnOutcome::Busy);

    drop(tx);
    first.await.unwrap();
}

// ─── Playback ───────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_is_best_effort() {
    let endpoint = Arc::new(ScriptedEndpoint {
        results: Mutex::new(vec![Ok(EvalResult::ok())].into()),
        evaluated: Mutex::new(Vec::new()),
        fail_stop: true,
    });
    let player = ready_player(endpoint).await;

    player.play("s(\"bd\")").await;
    assert_eq!(player.state(), PlaybackState::Playing);

    player.stop().await;
    let status = player.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(status.error.is_none());
}

/// Holds each evaluation until the test releases it.
struct GatedEndpoint {
    release: Mutex<Option<oneshot::Receiver<EvalResult>>>,
}

#[async_trait]
impl EvalEndpoint for GatedEndpoint {
    async fn is_ready(&self) -> Result<bool, RiffError> {
        Ok(true)
    }

    async fn evaluate(&self, _code: &str) -> Result<EvalResult, RiffError> {
        let rx = self.release.lock().unwrap().take();
        match rx {
            Some(rx) => rx.await.map_err(|_| RiffError::EndpointNotReady),
            None => Ok(EvalResult::ok()),
        }
    }

    async fn stop(&self) -> Result<EvalResult, RiffError> {
        Ok(EvalResult::ok())
    }

    async fn close(&self) -> Result<(), RiffError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_play_passes_through_loading() {
    let (release, rx) = oneshot::channel();
    let endpoint = Arc::new(GatedEndpoint {
        release: Mutex::new(Some(rx)),
    });
    let player = Arc::new(Player::new());
    player
        .init(endpoint, Duration::from_secs(1), Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(player.state(), PlaybackState::Stopped);

    let play = tokio::spawn({
        let player = player.clone();
        async move { player.play("s(\"hh*8\")").await }
    });

    let mut status = player.subscribe();
    status
        .wait_for(|s| s.state == PlaybackState::Loading)
        .await
        .unwrap();
    assert_eq!(player.state(), PlaybackState::Loading);
    assert_eq!(player.status().last_attempted.as_deref(), Some("s(\"hh*8\")"));
    assert!(player.status().current_pattern.is_none());

    release.send(EvalResult::ok()).unwrap();
    play.await.unwrap();

    let status = player.status();
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.current_pattern.as_deref(), Some("s(\"hh*8\")"));
}
