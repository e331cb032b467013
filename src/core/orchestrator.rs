// src/core/orchestrator.rs — Auto-correction loop
//
// One user turn: generate a reply, evaluate its pattern, and when evaluation
// fails feed the error back to the model for a bounded number of rounds.

use std::sync::Arc;

use super::conversation::ConversationController;
use super::feedback::build_retry_message;
use super::types::SessionEvent;
use crate::player::{EvalOutcome, Player};

/// Correction rounds attempted after a pattern fails, unless configured.
pub const DEFAULT_MAX_CORRECTIONS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_corrections: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_corrections: DEFAULT_MAX_CORRECTIONS,
        }
    }
}

/// State of one repair loop. Dropped when the loop ends.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub attempt: u32,
    pub last_code: String,
    pub last_error: String,
}

/// How a turn ended. Never an error: failures live in the conversation and
/// playback state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Another reply was still streaming; nothing happened.
    Busy,
    /// The first reply had no playable code.
    NoPattern,
    Played { pattern: String },
    /// The audio engine is down; retrying the code cannot help.
    EndpointNotReady,
    /// The audio engine misbehaved; the code was never judged.
    EngineFault { error: String },
    /// A correction reply had no playable code.
    CorrectionAbandoned { last_error: String },
    /// Every correction round failed to evaluate.
    GaveUp { last_code: String, last_error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub outcome: TurnOutcome,
    /// Correction requests sent during the turn.
    pub corrections: u32,
}

impl TurnSummary {
    fn new(outcome: TurnOutcome, corrections: u32) -> Self {
        Self {
            outcome,
            corrections,
        }
    }
}

pub struct Orchestrator {
    conversation: Arc<ConversationController>,
    player: Arc<Player>,
    policy: RetryPolicy,
    on_progress: Option<Box<dyn Fn(SessionEvent) + Send + Sync>>,
}

impl Orchestrator {
    pub fn new(
        conversation: Arc<ConversationController>,
        player: Arc<Player>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            conversation,
            player,
            policy,
            on_progress: None,
        }
    }

    /// Set a callback for turn lifecycle events.
    pub fn with_progress(mut self, cb: impl Fn(SessionEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub fn conversation(&self) -> &Arc<ConversationController> {
        &self.conversation
    }

    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    /// Run one user turn through generate, evaluate and repair.
    pub async fn handle_turn(&self, text: &str) -> TurnSummary {
        let reply = self.conversation.send_message(text).await;
        if reply.is_busy() {
            self.emit(SessionEvent::Busy);
            return TurnSummary::new(TurnOutcome::Busy, 0);
        }

        let Some(pattern) = reply.pattern else {
            self.emit(SessionEvent::NoPattern { attempt: 0 });
            return TurnSummary::new(TurnOutcome::NoPattern, 0);
        };

        match self.evaluate(0, &pattern).await {
            EvalOutcome::Ok => TurnSummary::new(TurnOutcome::Played { pattern }, 0),
            EvalOutcome::NotReady => TurnSummary::new(TurnOutcome::EndpointNotReady, 0),
            EvalOutcome::EngineFault(error) => {
                TurnSummary::new(TurnOutcome::EngineFault { error }, 0)
            }
            EvalOutcome::Failed(error) => {
                self.repair(RetryContext {
                    attempt: 0,
                    last_code: pattern,
                    last_error: error,
                })
                .await
            }
        }
    }

    /// Ask the model to fix `ctx.last_code` until it plays or the budget runs
    /// out. The last failure stays visible; nothing is rolled back.
    async fn repair(&self, mut ctx: RetryContext) -> TurnSummary {
        let budget = self.policy.max_corrections;

        while ctx.attempt < budget {
            ctx.attempt += 1;
            self.emit(SessionEvent::CorrectionRequested {
                attempt: ctx.attempt,
                budget,
            });
            tracing::info!(attempt = ctx.attempt, budget, "Requesting correction");

            let message = build_retry_message(&ctx.last_code, &ctx.last_error);
            let reply = self.conversation.send_message(&message).await;
            if reply.is_busy() {
                self.emit(SessionEvent::Busy);
                return TurnSummary::new(TurnOutcome::Busy, ctx.attempt - 1);
            }

            let Some(pattern) = reply.pattern else {
                self.emit(SessionEvent::NoPattern {
                    attempt: ctx.attempt,
                });
                return TurnSummary::new(
                    TurnOutcome::CorrectionAbandoned {
                        last_error: ctx.last_error,
                    },
                    ctx.attempt,
                );
            };

            match self.evaluate(ctx.attempt, &pattern).await {
                EvalOutcome::Ok => {
                    return TurnSummary::new(TurnOutcome::Played { pattern }, ctx.attempt);
                }
                EvalOutcome::NotReady => {
                    return TurnSummary::new(TurnOutcome::EndpointNotReady, ctx.attempt);
                }
                EvalOutcome::EngineFault(error) => {
                    return TurnSummary::new(TurnOutcome::EngineFault { error }, ctx.attempt);
                }
                EvalOutcome::Failed(error) => {
                    ctx.last_code = pattern;
                    ctx.last_error = error;
                }
            }
        }

        tracing::warn!(
            attempts = ctx.attempt,
            error = %ctx.last_error,
            "Giving up on corrections"
        );
        self.emit(SessionEvent::GaveUp {
            attempts: ctx.attempt,
            error: ctx.last_error.clone(),
        });
        TurnSummary::new(
            TurnOutcome::GaveUp {
                last_code: ctx.last_code,
                last_error: ctx.last_error,
            },
            ctx.attempt,
        )
    }

    async fn evaluate(&self, attempt: u32, pattern: &str) -> EvalOutcome {
        self.emit(SessionEvent::PatternExtracted {
            attempt,
            pattern: pattern.to_string(),
        });

        let outcome = self.player.play(pattern).await;
        match &outcome {
            EvalOutcome::Ok => self.emit(SessionEvent::Played { attempt }),
            EvalOutcome::Failed(error) => {
                tracing::debug!(attempt, error = %error, "Pattern failed to evaluate");
                self.emit(SessionEvent::EvaluationFailed {
                    attempt,
                    error: error.clone(),
                });
            }
            EvalOutcome::NotReady => self.emit(SessionEvent::EndpointNotReady),
            EvalOutcome::EngineFault(error) => self.emit(SessionEvent::EngineFault {
                error: error.clone(),
            }),
        }
        outcome
    }
}
