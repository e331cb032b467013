// src/player/mod.rs — Playback bridge over the external audio runtime
//
// The runtime is an opaque evaluator: it takes a pattern string and reports
// success or an error string. `PlaybackBridge` adapts it to `EvalOutcome`;
// `Player` layers the playback state machine on top.

pub mod process;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::types::{PlaybackState, PlaybackStatus};
use crate::infra::errors::RiffError;

/// Error text recorded when the runtime reports failure without a reason.
pub const UNKNOWN_EVAL_ERROR: &str = "Unknown evaluation error";

/// Result reported by the runtime for `evaluate` and `stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// What the bridge tells its caller about one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    Ok,
    Failed(String),
    /// No runtime attached, or it has exited. Retrying the code cannot help.
    NotReady,
    /// The runtime answered, but not with an evaluation result (protocol
    /// error, malformed reply). Not the pattern's fault.
    EngineFault(String),
}

/// The external evaluation endpoint.
#[async_trait]
pub trait EvalEndpoint: Send + Sync {
    /// Readiness signal, polled once at startup.
    async fn is_ready(&self) -> Result<bool, RiffError>;
    async fn evaluate(&self, code: &str) -> Result<EvalResult, RiffError>;
    async fn stop(&self) -> Result<EvalResult, RiffError>;
    /// Release the runtime. Called once on shutdown.
    async fn close(&self) -> Result<(), RiffError>;
}

/// Poll `endpoint` until it reports ready, for at most `timeout`.
pub async fn wait_until_ready(
    endpoint: &dyn EvalEndpoint,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), RiffError> {
    let poll = async {
        loop {
            if endpoint.is_ready().await? {
                return Ok(());
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(RiffError::ReadyTimeout {
            seconds: timeout.as_secs(),
        }),
    }
}

/// Thin adapter holding the active endpoint. No caching, retries or buffering.
#[derive(Default)]
pub struct PlaybackBridge {
    endpoint: RwLock<Option<Arc<dyn EvalEndpoint>>>,
}

impl PlaybackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, endpoint: Arc<dyn EvalEndpoint>) {
        *self.endpoint.write().unwrap_or_else(|e| e.into_inner()) = Some(endpoint);
    }

    pub fn detach(&self) -> Option<Arc<dyn EvalEndpoint>> {
        self.endpoint
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn is_attached(&self) -> bool {
        self.endpoint().is_some()
    }

    fn endpoint(&self) -> Option<Arc<dyn EvalEndpoint>> {
        self.endpoint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Submit `code`. Never fails: every problem becomes an `EvalOutcome`.
    pub async fn evaluate(&self, code: &str) -> EvalOutcome {
        let Some(endpoint) = self.endpoint() else {
            return EvalOutcome::NotReady;
        };
        match endpoint.evaluate(code).await {
            Ok(result) if result.ok => EvalOutcome::Ok,
            Ok(result) => {
                EvalOutcome::Failed(result.error.unwrap_or_else(|| UNKNOWN_EVAL_ERROR.into()))
            }
            Err(RiffError::EndpointNotReady) => EvalOutcome::NotReady,
            Err(e) => {
                tracing::warn!(error = %e, "Audio engine fault during evaluate");
                EvalOutcome::EngineFault(e.to_string())
            }
        }
    }

    /// Best-effort stop: failures are logged and otherwise ignored.
    pub async fn stop(&self) {
        let Some(endpoint) = self.endpoint() else {
            return;
        };
        match endpoint.stop().await {
            Ok(result) if !result.ok => {
                tracing::debug!(error = ?result.error, "Runtime refused stop; ignoring");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Stop failed; ignoring"),
        }
    }
}

/// Playback state machine exposed to the presentation layer.
///
/// `stopped -> loading -> {playing | error}`, back to `loading` on the next
/// play, and `stopped` on explicit stop or shutdown.
pub struct Player {
    bridge: PlaybackBridge,
    status: watch::Sender<PlaybackStatus>,
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Player {
    pub fn new() -> Self {
        let (status, _) = watch::channel(PlaybackStatus::default());
        Self {
            bridge: PlaybackBridge::new(),
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.status.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.bridge.is_attached()
    }

    /// Wait for `endpoint` to come up and attach it. On failure the endpoint
    /// is closed and the error is left visible in the status.
    pub async fn init(
        &self,
        endpoint: Arc<dyn EvalEndpoint>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), RiffError> {
        if self.bridge.is_attached() {
            return Ok(());
        }

        tracing::info!(timeout_secs = timeout.as_secs(), "Waiting for audio engine");
        match wait_until_ready(endpoint.as_ref(), timeout, poll_interval).await {
            Ok(()) => {
                self.bridge.attach(endpoint);
                self.status.send_modify(|s| {
                    s.state = PlaybackState::Stopped;
                    s.error = None;
                });
                tracing::info!("Audio engine ready");
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = endpoint.close().await {
                    tracing::debug!(error = %close_err, "Closing failed engine");
                }
                self.status.send_modify(|s| {
                    s.state = PlaybackState::Error;
                    s.error = Some(format!("Audio engine failed to start: {e}"));
                });
                Err(e)
            }
        }
    }

    /// Evaluate `code` and record the outcome.
    pub async fn play(&self, code: &str) -> EvalOutcome {
        if !self.bridge.is_attached() {
            self.status.send_modify(|s| {
                s.state = PlaybackState::Error;
                s.last_attempted = Some(code.to_string());
                s.error = Some(RiffError::EndpointNotReady.to_string());
            });
            return EvalOutcome::NotReady;
        }

        self.status.send_modify(|s| {
            s.state = PlaybackState::Loading;
            s.last_attempted = Some(code.to_string());
            s.error = None;
        });

        let outcome = self.bridge.evaluate(code).await;
        self.status.send_modify(|s| match &outcome {
            EvalOutcome::Ok => {
                s.state = PlaybackState::Playing;
                s.current_pattern = Some(code.to_string());
            }
            EvalOutcome::Failed(error) | EvalOutcome::EngineFault(error) => {
                s.state = PlaybackState::Error;
                s.error = Some(error.clone());
            }
            EvalOutcome::NotReady => {
                s.state = PlaybackState::Error;
                s.error = Some(RiffError::EndpointNotReady.to_string());
            }
        });
        outcome
    }

    /// Stop playback. Always ends in `stopped` with no error shown.
    pub async fn stop(&self) {
        self.bridge.stop().await;
        self.status.send_modify(|s| {
            s.state = PlaybackState::Stopped;
            s.error = None;
        });
    }

    /// Stop, then release the runtime. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.bridge.stop().await;
        if let Some(endpoint) = self.bridge.detach() {
            if let Err(e) = endpoint.close().await {
                tracing::debug!(error = %e, "Closing audio engine failed; ignoring");
            }
            tracing::info!("Audio engine released");
        }
        self.status.send_modify(|s| s.state = PlaybackState::Stopped);
    }
}
