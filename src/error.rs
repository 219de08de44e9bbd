//! Error types for the invox library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Terminal** for the current document: the pipeline
//!   cannot produce a record from this input (unreadable image, missing
//!   prompt template, every provider chain exhausted). The orchestrator
//!   converts these into the [`crate::model::ExtractionResult`] error list
//!   rather than letting them escape, so one bad document never aborts a
//!   batch.
//!
//! * [`ProviderError`] — **Retryable** inside the gateway: a single provider
//!   attempt failed (timeout, auth, rate limit, empty payload). It counts
//!   against that provider's retry budget; only once every chain is
//!   exhausted does it surface as `ExtractError::ProvidersExhausted`,
//!   carrying every attempt's reason so diagnostics are not lost to
//!   last-error masking.

use crate::model::VendorCategory;
use thiserror::Error;

/// All terminal errors produced while processing one document.
///
/// Provider-attempt failures use [`ProviderError`] and are aggregated into
/// [`ExtractError::ProvidersExhausted`] by the gateway rather than
/// propagated individually.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Image errors ──────────────────────────────────────────────────────
    /// The file extension / declared format is not one we can decode.
    #[error("Unsupported source format '{detail}'\nSupported: tiff, tif, png, jpg, jpeg")]
    UnsupportedFormat { detail: String },

    /// The bytes could not be decoded as the declared format.
    #[error("Failed to decode image: {detail}")]
    ImageDecode { detail: String },

    /// The container decoded but held no pages.
    #[error("Document contains no pages")]
    EmptyDocument,

    /// Encoding a normalized page for the provider request failed.
    #[error("Failed to encode page {page}: {detail}")]
    ImageEncode { page: usize, detail: String },

    // ── Prompt / config errors ────────────────────────────────────────────
    /// No extraction prompt template exists for the vendor category.
    #[error("No prompt template for vendor category '{category}'")]
    PromptMissing { category: VendorCategory },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A named provider could not be instantiated (missing API key etc.).
    #[error("Extraction provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Gateway errors ────────────────────────────────────────────────────
    /// Every provider chain was exhausted. One entry per chain, each
    /// summarising all of that provider's attempts.
    #[error("All extraction providers exhausted:\n{}", .failures.join("\n"))]
    ProvidersExhausted { failures: Vec<String> },

    /// Shutdown was requested before the document could start.
    #[error("Shutdown requested; document not processed")]
    ShutdownRequested,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single failed provider attempt.
///
/// Classified so the gateway can log meaningfully; every variant counts
/// against the retry budget identically — a timeout is treated the same as
/// any other provider failure.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The attempt exceeded the per-attempt timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider rejected our credentials (401/403).
    #[error("authentication failed: {detail}")]
    Auth { detail: String },

    /// The provider returned HTTP 429.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// The provider answered with an empty payload.
    #[error("empty response")]
    EmptyResponse,

    /// Any other provider-reported failure.
    #[error("{message}")]
    Api { message: String },
}
