// src/provider/resolver.rs — Pick the transport for the configured model

use std::sync::Arc;

use super::anthropic::AnthropicProvider;
use super::openai::OpenAIProvider;
use super::{ModelProvider, ModelRef};
use crate::infra::errors::RiffError;

/// Env var holding the API key for a provider id.
pub fn key_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        _ => None,
    }
}

/// Build the provider for `model_ref` from process env vars.
pub fn resolve_provider(
    model_ref: &ModelRef,
    base_url: Option<&str>,
) -> Result<Arc<dyn ModelProvider>, RiffError> {
    resolve_provider_with(model_ref, base_url, |var| {
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    })
}

/// Build the provider for `model_ref`, reading keys through `lookup`.
///
/// A custom `base_url` for the OpenAI protocol may run without a key
/// (local servers such as Ollama).
pub fn resolve_provider_with(
    model_ref: &ModelRef,
    base_url: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn ModelProvider>, RiffError> {
    let env_var = key_env_var(&model_ref.provider).ok_or_else(|| {
        RiffError::Config(format!(
            "Unknown provider '{}'. Supported: anthropic, openai.",
            model_ref.provider
        ))
    })?;
    let key = lookup(env_var);

    let missing = || RiffError::NoProvider {
        provider: model_ref.provider.clone(),
        env_var: env_var.to_string(),
    };

    match model_ref.provider.as_str() {
        "anthropic" => {
            let key = key.ok_or_else(missing)?;
            Ok(Arc::new(AnthropicProvider::new(key)))
        }
        "openai" => match (key, base_url) {
            (key, Some(url)) => {
                tracing::debug!(base_url = url, "Using OpenAI-compatible endpoint");
                Ok(Arc::new(OpenAIProvider::with_base_url(
                    key.unwrap_or_default(),
                    url.to_string(),
                )))
            }
            (Some(key), None) => Ok(Arc::new(OpenAIProvider::new(key))),
            (None, None) => Err(missing()),
        },
        other => Err(RiffError::Config(format!("No transport for provider '{other}'."))),
    }
}
