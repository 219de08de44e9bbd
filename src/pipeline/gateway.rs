//! Provider gateway: drive the extraction chain with retry and fallback.
//!
//! The chain is an ordered list of provider adapters, each with its own
//! retry budget. The gateway walks the list, stops at the first success, and
//! — on total exhaustion — reports an aggregated failure naming every
//! attempt's reason, so the diagnostics for the primary chain are never
//! masked by the fallback's last error.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 and timeouts are transient and frequent under concurrent
//! load. Exponential backoff (`base * 2^(attempt-1)`, capped) avoids
//! thundering-herd: with the 1 s base and 3 attempts the wait sequence is
//! 1 s → 2 s, totalling < 4 s of back-off per provider.
//!
//! Backoff sleeps block only the worker driving this document; unrelated
//! documents in the batch keep flowing.
//!
//! ## Failure semantics
//!
//! Any error returned by [`ProviderChain::extract`] is terminal for the
//! current document — there is no retry loop above the gateway.

use crate::config::RetryPolicy;
use crate::error::ExtractError;
use crate::model::TokenUsage;
use crate::provider::ExtractionProvider;
use edgequake_llm::ImageData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Cooperative cancellation handle.
///
/// Honoured at "do not start a new attempt / document" granularity: an
/// in-flight provider call is never torn down, which avoids half-completed
/// requests counting against rate limits for nothing.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; visible to every clone of this handle.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One provider plus its retry budget.
pub struct ChainLink {
    pub provider: Arc<dyn ExtractionProvider>,
    pub retry: RetryPolicy,
}

/// Uniform response envelope for a successful extraction call.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Raw textual payload from the provider.
    pub text: String,
    /// Identifier of the provider that ultimately succeeded.
    pub provider: String,
    /// Token counts, when reported.
    pub usage: Option<TokenUsage>,
    /// End-to-end gateway latency, including retries and backoff.
    pub latency_ms: u64,
}

/// The ordered provider chain for one pipeline.
pub struct ProviderChain {
    links: Vec<ChainLink>,
    attempt_timeout: Duration,
}

impl ProviderChain {
    pub fn new(links: Vec<ChainLink>, attempt_timeout: Duration) -> Self {
        ProviderChain {
            links,
            attempt_timeout,
        }
    }

    /// Provider identifiers in chain order, for logging and tests.
    pub fn provider_ids(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.provider.id()).collect()
    }

    /// Submit the document to the chain.
    ///
    /// Every link receives the identical image sequence and prompt. Each
    /// link is retried up to its own budget before the next link is tried;
    /// a timeout counts against the budget exactly like a provider error.
    pub async fn extract(
        &self,
        images: &[ImageData],
        prompt: &str,
        shutdown: &Shutdown,
    ) -> Result<ProviderResponse, ExtractError> {
        let start = Instant::now();
        let mut failures: Vec<String> = Vec::new();

        'chain: for (chain_pos, link) in self.links.iter().enumerate() {
            let provider_id = link.provider.id();
            if chain_pos > 0 {
                warn!(
                    provider = provider_id,
                    "previous chain exhausted, falling back"
                );
            }

            let mut attempt_failures: Vec<String> = Vec::new();

            for attempt in 1..=link.retry.max_attempts {
                if shutdown.is_requested() {
                    attempt_failures.push("shutdown requested; remaining attempts skipped".into());
                    failures.push(summarise(provider_id, &attempt_failures));
                    break 'chain;
                }

                let delay = link.retry.delay_before(attempt);
                if !delay.is_zero() {
                    warn!(
                        provider = provider_id,
                        attempt,
                        max = link.retry.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    sleep(delay).await;
                }

                match link.provider.call(images, prompt, self.attempt_timeout).await {
                    Ok(reply) => {
                        let latency_ms = start.elapsed().as_millis() as u64;
                        info!(
                            provider = provider_id,
                            attempt, latency_ms, "extraction call succeeded"
                        );
                        return Ok(ProviderResponse {
                            text: reply.text,
                            provider: provider_id.to_string(),
                            usage: reply.usage,
                            latency_ms,
                        });
                    }
                    Err(e) => {
                        debug!(provider = provider_id, attempt, error = %e, "attempt failed");
                        attempt_failures.push(format!("attempt {attempt}: {e}"));
                    }
                }
            }

            failures.push(summarise(provider_id, &attempt_failures));
        }

        warn!(
            chains = failures.len(),
            "every provider chain exhausted"
        );
        Err(ExtractError::ProvidersExhausted { failures })
    }
}

/// One line per chain: provider id plus every attempt's reason.
fn summarise(provider_id: &str, attempt_failures: &[String]) -> String {
    format!("{provider_id}: {}", attempt_failures.join("; "))
}
