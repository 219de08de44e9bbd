//! Provider abstraction: the uniform contract every extraction backend meets.
//!
//! The gateway never talks to a vendor SDK directly — it iterates an ordered
//! list of [`ExtractionProvider`] adapters, all exposing the same
//! `call(images, prompt, timeout)` shape. That seam is what makes the
//! primary/fallback chain a plain list walk, and what lets tests inject
//! scripted providers without any network.
//!
//! The production adapter, [`VisionLlmProvider`], wraps an
//! `edgequake_llm::LLMProvider` so any vision-capable backend the factory
//! knows (gemini, openrouter, openai, anthropic, ollama, …) can serve as a
//! chain link.

use crate::error::{ExtractError, ProviderError};
use crate::model::TokenUsage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Payload of one successful provider call.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    /// Raw textual response — expected (but not guaranteed) to be JSON.
    pub text: String,
    /// Token counts, when the provider reports usage.
    pub usage: Option<TokenUsage>,
}

/// An extraction backend: document page images + prompt in, raw text out.
///
/// Implementations must apply `timeout` to the underlying call themselves
/// and surface it as [`ProviderError::Timeout`]; the gateway treats a
/// timeout identically to any other failed attempt.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Stable identifier recorded as the `source` of a result, e.g. "gemini".
    fn id(&self) -> &str;

    /// Submit one document (all pages) and return the raw response.
    async fn call(
        &self,
        images: &[ImageData],
        prompt: &str,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError>;
}

/// Completion parameters shared by every call through one adapter.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

/// [`ExtractionProvider`] backed by an edgequake-llm vision provider.
pub struct VisionLlmProvider {
    id: String,
    inner: Arc<dyn LLMProvider>,
    options: CallOptions,
}

impl VisionLlmProvider {
    /// Wrap an already-constructed provider.
    pub fn new(id: impl Into<String>, inner: Arc<dyn LLMProvider>, options: CallOptions) -> Self {
        VisionLlmProvider {
            id: id.into(),
            inner,
            options,
        }
    }

    /// Instantiate a named provider through the factory, which reads the
    /// corresponding API key (`GEMINI_API_KEY`, `OPENROUTER_API_KEY`, …)
    /// from the environment.
    pub fn from_name(
        name: &str,
        model: &str,
        options: CallOptions,
    ) -> Result<Self, ExtractError> {
        let inner = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            ExtractError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(VisionLlmProvider::new(name, inner, options))
    }
}

#[async_trait]
impl ExtractionProvider for VisionLlmProvider {
    fn id(&self) -> &str {
        &self.id
    }

    /// ## Message Layout
    ///
    /// 1. **System message** — the category-specific extraction prompt,
    ///    schema included.
    /// 2. **User message** — every page image as a base64 attachment
    ///    (empty text).
    ///
    /// The empty user text is intentional: vision APIs require at least one
    /// user turn to respond to, but the images carry all the content.
    async fn call(
        &self,
        images: &[ImageData],
        prompt: &str,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user_with_images("", images.to_vec()),
        ];
        let options = CompletionOptions {
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
            ..Default::default()
        };

        let response = tokio::time::timeout(timeout, self.inner.chat(&messages, Some(&options)))
            .await
            .map_err(|_| ProviderError::Timeout {
                secs: timeout.as_secs(),
            })?
            .map_err(|e| classify_api_error(&format!("{e}")))?;

        if response.content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        debug!(
            provider = %self.id,
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "provider call complete"
        );

        Ok(ProviderReply {
            text: response.content,
            usage: Some(TokenUsage {
                input: response.prompt_tokens as u64,
                output: response.completion_tokens as u64,
            }),
        })
    }
}

/// Map an SDK error message onto the retryable-failure taxonomy.
///
/// edgequake-llm surfaces HTTP-level detail only in the message text, so
/// classification is by substring match on the status line.
fn classify_api_error(msg: &str) -> ProviderError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized")
        || lower.contains("authentication")
    {
        ProviderError::Auth {
            detail: msg.to_string(),
        }
    } else if lower.contains("429") || lower.contains("rate limit") {
        ProviderError::RateLimited {
            detail: msg.to_string(),
        }
    } else {
        ProviderError::Api {
            message: msg.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_errors() {
        assert!(matches!(
            classify_api_error("HTTP 401 Unauthorized"),
            ProviderError::Auth { .. }
        ));
        assert!(matches!(
            classify_api_error("authentication token expired"),
            ProviderError::Auth { .. }
        ));
    }

    #[test]
    fn classify_rate_limit() {
        assert!(matches!(
            classify_api_error("HTTP 429 Too Many Requests"),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_api_error("Rate limit exceeded, retry later"),
            ProviderError::RateLimited { .. }
        ));
    }

    #[test]
    fn classify_other_as_api() {
        assert!(matches!(
            classify_api_error("HTTP 503 Service Unavailable"),
            ProviderError::Api { .. }
        ));
    }
}
