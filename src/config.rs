//! Configuration types for invoice extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across workers, serialise the tunable
//! parts for logging, and diff two runs to understand why their outputs
//! differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::ExtractError;
use crate::provider::ExtractionProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A provider selected by name and model, instantiated through the
/// edgequake-llm provider factory when the pipeline is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Factory name, e.g. "gemini", "openrouter", "openai".
    pub name: String,
    /// Model identifier understood by that provider.
    pub model: String,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        ProviderSpec {
            name: name.into(),
            model: model.into(),
        }
    }
}

/// Retry budget and backoff shape for one provider in the chain.
///
/// The delay before attempt *n* (n ≥ 2) is `backoff_base_ms * 2^(n-2)`,
/// capped at `backoff_cap_ms`. With the 1 s default base and three attempts
/// the wait sequence is 1 s → 2 s, totalling < 4 s of back-off per provider.
/// Exponential growth avoids the thundering-herd problem where N concurrent
/// workers retry simultaneously against a recovering endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    pub backoff_cap_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff_base_ms: 1_000,
            backoff_cap_ms: 8_000,
        }
    }

    /// Backoff before the given attempt (1-indexed); zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(32);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

/// Tolerances for the reconciliation rules, in currency units.
///
/// These are empirically chosen numbers with no stated derivation; they are
/// configuration precisely so they can be re-tuned against ground-truth data
/// instead of being trusted as business requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerances {
    /// `|commission_amount - subtotal * commission_rate|` bound. Default 0.02.
    pub commission: Decimal,
    /// `|total_amount - (subtotal + tax_amount)|` bound. Default 0.05.
    pub total: Decimal,
    /// `|Σ line amounts - subtotal|` bound (warning-level). Default 0.10.
    pub line_item_sum: Decimal,
}

impl Default for Tolerances {
    fn default() -> Self {
        Tolerances {
            commission: Decimal::new(2, 2),
            total: Decimal::new(5, 2),
            line_item_sum: Decimal::new(10, 2),
        }
    }
}

/// Weights of the three confidence components, plus the score assumed for a
/// provider that does not report its own confidence.
///
/// The weights must sum to 1.0; [`ExtractionConfigBuilder::build`] enforces
/// this so a mistuned config fails fast instead of silently skewing every
/// score in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    /// Weight of the required-field completeness ratio. Default 0.40.
    pub completeness: f64,
    /// Weight of the business-rule pass ratio. Default 0.30.
    pub consistency: f64,
    /// Weight of the provider-reported confidence. Default 0.30.
    pub provider: f64,
    /// Assumed provider confidence when none is reported. Default 0.80.
    pub provider_default: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        ConfidenceWeights {
            completeness: 0.40,
            consistency: 0.30,
            provider: 0.30,
            provider_default: 0.80,
        }
    }
}

/// Configuration for the extraction pipeline.
///
/// Built via [`ExtractionConfig::builder()`] or [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use invox::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_image_dim(2048)
///     .concurrency(8)
///     .attempt_timeout_secs(45)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum normalized image dimension (width or height) in pixels. Default: 4096.
    ///
    /// Scanned invoices arrive anywhere from fax resolution to 600-DPI
    /// archive scans. Capping the longest edge keeps request bodies under
    /// typical provider upload limits while leaving small print legible;
    /// the aspect ratio is always preserved.
    pub max_image_dim: u32,

    /// Number of documents processed concurrently in a batch. Default: 4.
    ///
    /// Provider calls are network-bound, so a handful of in-flight documents
    /// typically saturates throughput. Raise this if the provider account has
    /// generous rate limits; lower it when 429s appear in the logs.
    pub concurrency: usize,

    /// Primary extraction provider. Default: gemini / gemini-2.0-flash.
    pub primary: ProviderSpec,

    /// Fallback provider, tried only after the primary chain is exhausted.
    /// Default: openrouter / anthropic/claude-3.5-sonnet.
    pub fallback: ProviderSpec,

    /// Pre-constructed provider chain. Takes precedence over
    /// `primary`/`fallback`. Useful in tests or when the caller needs custom
    /// middleware (caching, rate-limiting).
    pub providers: Option<Vec<Arc<dyn ExtractionProvider>>>,

    /// Retry budget for the primary provider. Default: 3 attempts.
    pub primary_retry: RetryPolicy,

    /// Retry budget for the fallback provider. Default: 2 attempts.
    pub fallback_retry: RetryPolicy,

    /// Per-attempt provider timeout in seconds. Default: 30.
    ///
    /// A timeout counts against the retry budget exactly like any other
    /// provider failure.
    pub attempt_timeout_secs: u64,

    /// Sampling temperature for the extraction completion. Default: 0.1.
    ///
    /// Low temperature keeps the model faithful to what is printed on the
    /// page — exactly what structured extraction needs.
    pub temperature: f32,

    /// Maximum tokens the provider may generate per document. Default: 4096.
    pub max_tokens: usize,

    /// Reconciliation tolerances used by the business-rule layer.
    pub tolerances: Tolerances,

    /// Confidence-formula weights used by the scoring layer.
    pub weights: ConfidenceWeights,

    /// Process documents whose source was already associated with an
    /// extracted identifier in this run. Default: false (skip with a warning).
    pub reprocess_duplicates: bool,

    /// Maximum length of the raw-response excerpt kept for diagnostics.
    /// Default: 2000. The full provider payload is never stored in results.
    pub raw_excerpt_limit: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_image_dim: 4096,
            concurrency: 4,
            primary: ProviderSpec::new("gemini", "gemini-2.0-flash"),
            fallback: ProviderSpec::new("openrouter", "anthropic/claude-3.5-sonnet"),
            providers: None,
            primary_retry: RetryPolicy::new(3),
            fallback_retry: RetryPolicy::new(2),
            attempt_timeout_secs: 30,
            temperature: 0.1,
            max_tokens: 4096,
            tolerances: Tolerances::default(),
            weights: ConfidenceWeights::default(),
            reprocess_duplicates: false,
            raw_excerpt_limit: 2_000,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_image_dim", &self.max_image_dim)
            .field("concurrency", &self.concurrency)
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .field(
                "providers",
                &self.providers.as_ref().map(|p| format!("<{} providers>", p.len())),
            )
            .field("primary_retry", &self.primary_retry)
            .field("fallback_retry", &self.fallback_retry)
            .field("attempt_timeout_secs", &self.attempt_timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tolerances", &self.tolerances)
            .field("weights", &self.weights)
            .field("reprocess_duplicates", &self.reprocess_duplicates)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Per-attempt timeout as a [`Duration`].
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_image_dim(mut self, px: u32) -> Self {
        self.config.max_image_dim = px.max(256);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn primary(mut self, spec: ProviderSpec) -> Self {
        self.config.primary = spec;
        self
    }

    pub fn fallback(mut self, spec: ProviderSpec) -> Self {
        self.config.fallback = spec;
        self
    }

    /// Install a pre-built provider chain, bypassing the factory entirely.
    pub fn providers(mut self, providers: Vec<Arc<dyn ExtractionProvider>>) -> Self {
        self.config.providers = Some(providers);
        self
    }

    pub fn primary_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.primary_retry = policy;
        self
    }

    pub fn fallback_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.fallback_retry = policy;
        self
    }

    pub fn attempt_timeout_secs(mut self, secs: u64) -> Self {
        self.config.attempt_timeout_secs = secs.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn tolerances(mut self, t: Tolerances) -> Self {
        self.config.tolerances = t;
        self
    }

    pub fn weights(mut self, w: ConfidenceWeights) -> Self {
        self.config.weights = w;
        self
    }

    pub fn reprocess_duplicates(mut self, v: bool) -> Self {
        self.config.reprocess_duplicates = v;
        self
    }

    pub fn raw_excerpt_limit(mut self, n: usize) -> Self {
        self.config.raw_excerpt_limit = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        let weight_sum = c.weights.completeness + c.weights.consistency + c.weights.provider;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(ExtractError::InvalidConfig(format!(
                "confidence weights must sum to 1.0, got {weight_sum}"
            )));
        }
        if !(0.0..=1.0).contains(&c.weights.provider_default) {
            return Err(ExtractError::InvalidConfig(format!(
                "provider_default must be in [0, 1], got {}",
                c.weights.provider_default
            )));
        }
        if c.tolerances.commission.is_sign_negative()
            || c.tolerances.total.is_sign_negative()
            || c.tolerances.line_item_sum.is_sign_negative()
        {
            return Err(ExtractError::InvalidConfig(
                "tolerances must be non-negative".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ExtractionConfig::builder().build().unwrap();
        assert_eq!(config.primary_retry.max_attempts, 3);
        assert_eq!(config.fallback_retry.max_attempts, 2);
        assert_eq!(config.tolerances, Tolerances::default());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 3_000,
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(3_000)); // capped
        assert_eq!(policy.delay_before(5), Duration::from_millis(3_000));
    }

    #[test]
    fn mistuned_weights_rejected() {
        let err = ExtractionConfig::builder()
            .weights(ConfidenceWeights {
                completeness: 0.5,
                consistency: 0.5,
                provider: 0.5,
                provider_default: 0.8,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn clamped_setters() {
        let config = ExtractionConfig::builder()
            .concurrency(0)
            .max_image_dim(10)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_image_dim, 256);
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn negative_tolerance_rejected() {
        let err = ExtractionConfig::builder()
            .tolerances(Tolerances {
                commission: Decimal::new(-2, 2),
                ..Tolerances::default()
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }
}
