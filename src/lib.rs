//! # invox
//!
//! Extract structured, validated invoice records from scanned documents
//! using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Classic OCR turns a delivery-platform invoice into a soup of unlabeled
//! text — amounts without columns, dates without roles. Instead this crate
//! hands the page images to a VLM with a schema-bearing prompt and gets a
//! JSON record back, then refuses to trust it: every candidate passes
//! through schema validation, cross-field business rules with numeric
//! tolerances, and a confidence score before it is considered usable.
//!
//! ## Pipeline Overview
//!
//! ```text
//! scan (TIFF/PNG/JPEG)
//!  │
//!  ├─ 1. Normalize  decode pages, resize, canonical RGB (CPU, spawn_blocking)
//!  ├─ 2. Encode     PNG → base64 ImageData
//!  ├─ 3. Gateway    primary provider with retries → fallback provider
//!  ├─ 4. Payload    strip fences / prose around the returned JSON
//!  ├─ 5. Schema     typed record or the complete list of field errors
//!  ├─ 6. Rules      date order, reconciliation within tolerances
//!  ├─ 7. Confidence completeness / consistency / provider-weighted score
//!  └─ 8. Result     one serializable ExtractionResult per document
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invox::{DocumentInput, ExtractionConfig, Extractor, SourceFormat, VendorCategory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Providers auto-configured from GEMINI_API_KEY / OPENROUTER_API_KEY
//!     let extractor = Extractor::new(ExtractionConfig::default())?;
//!
//!     let bytes = std::fs::read("invoice_001.tiff")?;
//!     let doc = DocumentInput::new(bytes, SourceFormat::Tiff, "invoice_001.tiff");
//!     let result = extractor
//!         .extract_document(doc, VendorCategory::UberEats)
//!         .await;
//!
//!     if let Some(invoice) = &result.invoice {
//!         println!("{} — total {}", invoice.invoice_id, invoice.total_amount);
//!     }
//!     eprintln!("confidence: {:.2}", result.confidence);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invox` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! invox = { version = "0.3", default-features = false }
//! ```
//!
//! ## Validation model
//!
//! A document **succeeds** only when its payload is schema-valid *and* no
//! error-severity business rule fires. Warning-severity findings (line-item
//! drift, unexpected identifier prefix) are surfaced on the result and
//! lower the confidence score without blocking. Every failure mode — bad
//! image, exhausted providers, malformed payload, broken invariants — ends
//! up as data inside [`ExtractionResult`], never as a panic or a lost
//! document.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConfidenceWeights, ExtractionConfig, ExtractionConfigBuilder, ProviderSpec, RetryPolicy,
    Tolerances,
};
pub use error::{ExtractError, ProviderError};
pub use extract::{DedupIndex, DocumentInput, Extractor};
pub use model::{
    ExtractionResult, Invoice, LineItem, RuleViolation, SchemaError, Severity, TokenUsage,
    ValidationReport, VendorCategory,
};
pub use pipeline::gateway::{ProviderResponse, Shutdown};
pub use pipeline::normalize::{NormalizedImage, SourceFormat};
pub use prompts::{BuiltinPrompts, PromptSource};
pub use provider::{CallOptions, ExtractionProvider, ProviderReply, VisionLlmProvider};
pub use stream::ResultStream;
