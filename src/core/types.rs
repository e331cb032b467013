// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry in the conversation history.
///
/// The id is fixed at creation. Only an in-flight assistant message has its
/// content replaced; once appended to the history a message never changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Pattern extracted from `content` when the message was finalized.
    pub pattern: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            pattern: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An empty assistant message, used as the in-flight placeholder.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }
}

/// Conversation as seen by observers of the controller.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    /// Finalized messages in insertion order.
    pub messages: Vec<Message>,
    /// Assistant message currently being streamed, if any.
    pub in_flight: Option<Message>,
}

impl ConversationState {
    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Content of the in-flight reply so far (empty when idle).
    pub fn streaming_text(&self) -> &str {
        self.in_flight
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Error,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Error => write!(f, "error"),
        }
    }
}

/// Everything the presentation layer shows about playback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Last pattern that evaluated successfully.
    pub current_pattern: Option<String>,
    /// Last pattern submitted for evaluation, successful or not.
    pub last_attempted: Option<String>,
    pub error: Option<String>,
}

/// Lifecycle events fired by the orchestrator during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A turn was submitted while another was still streaming.
    Busy,
    /// The reply contained no playable code block.
    NoPattern { attempt: u32 },
    PatternExtracted { attempt: u32, pattern: String },
    Played { attempt: u32 },
    EvaluationFailed { attempt: u32, error: String },
    CorrectionRequested { attempt: u32, budget: u32 },
    EndpointNotReady,
    /// The engine returned a protocol error instead of a result.
    EngineFault { error: String },
    /// Every correction round failed; the last error stays visible.
    GaveUp { attempts: u32, error: String },
}
