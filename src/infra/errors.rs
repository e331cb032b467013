// src/infra/errors.rs — Error types for Riff

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiffError {
    // Transport errors, categorized so the conversation can explain them
    #[error("Authentication with '{provider}' failed: {message}")]
    Auth { provider: String, message: String },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Could not reach '{provider}': {message}")]
    Connection { provider: String, message: String },

    #[error("Provider '{provider}' error: {message}")]
    Provider { provider: String, message: String },

    // Audio runtime
    #[error("Audio engine not running")]
    EndpointNotReady,

    #[error("Audio engine error: {0}")]
    Endpoint(String),

    #[error("Audio engine did not become ready within {seconds}s")]
    ReadyTimeout { seconds: u64 },

    // User errors
    #[error("No API key for '{provider}'. Set {env_var} (a .env file in the working directory works too).")]
    NoProvider { provider: String, env_var: String },

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RiffError {
    /// The text stored as the assistant's reply when a streaming turn fails.
    pub fn user_message(&self) -> String {
        match self {
            RiffError::Auth { provider, .. } => format!(
                "Error: authentication with {provider} failed. Check your API key."
            ),
            RiffError::RateLimited {
                provider,
                retry_after_ms,
            } => format!(
                "Error: {provider} is rate limiting requests. Try again in {}s.",
                (retry_after_ms / 1000).max(1)
            ),
            RiffError::Connection { provider, message } => {
                format!("Error: could not connect to {provider} ({message}).")
            }
            other => format!("Error: {other}"),
        }
    }

    /// Transport failures a later request could succeed on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RiffError::RateLimited { .. } | RiffError::Connection { .. }
        )
    }
}
