//! Pipeline orchestration: one document from raw bytes to terminal result.
//!
//! [`Extractor`] owns the resolved provider chain, the prompt source, and
//! the advisory deduplication index, and drives each document through the
//! strictly forward stages: normalize → extract → validate. There is no
//! retry loop here — the gateway owns its own retries, and every other
//! failure is terminal for the document.
//!
//! The single invariant this module enforces is that **no document-level
//! failure escapes as an error**: whatever goes wrong is packaged into the
//! [`ExtractionResult`] error list, so a batch of many documents never
//! aborts because one of them is bad.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::model::{ExtractionResult, Severity, VendorCategory};
use crate::pipeline::gateway::{ChainLink, ProviderChain, Shutdown};
use crate::pipeline::normalize::{self, SourceFormat};
use crate::pipeline::{encode, run_validation};
use crate::prompts::{self, BuiltinPrompts, PromptSource};
use crate::provider::{CallOptions, VisionLlmProvider};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One document handed to the pipeline by the discovery collaborator.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Declared raster format of the bytes.
    pub format: SourceFormat,
    /// Reference to where the bytes came from, echoed into the result.
    pub source: String,
}

impl DocumentInput {
    pub fn new(bytes: Vec<u8>, format: SourceFormat, source: impl Into<String>) -> Self {
        DocumentInput {
            bytes,
            format,
            source: source.into(),
        }
    }

    /// Read a document from disk, inferring the format from the extension
    /// and falling back to magic-byte sniffing for misnamed files.
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractError::ImageDecode {
            detail: format!("{}: {e}", path.display()),
        })?;
        let by_name = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(SourceFormat::from_extension);
        let format = by_name.or_else(|| SourceFormat::sniff(&bytes)).ok_or_else(|| {
            ExtractError::UnsupportedFormat {
                detail: path.display().to_string(),
            }
        })?;
        Ok(DocumentInput::new(bytes, format, path.display().to_string()))
    }
}

/// Advisory record of identifiers extracted earlier in this run.
///
/// Keyed two ways: by extracted invoice identifier, and by the source
/// reference that produced it, so the skip decision can be made before any
/// work is done on a re-submitted file. Safe for concurrent workers.
#[derive(Debug, Default)]
pub struct DedupIndex {
    inner: Mutex<DedupState>,
}

#[derive(Debug, Default)]
struct DedupState {
    ids: HashSet<String>,
    by_source: HashMap<String, String>,
}

impl DedupIndex {
    /// Identifier a prior pass extracted from this source, if any.
    pub fn known_id_for(&self, source: &str) -> Option<String> {
        self.lock().by_source.get(source).cloned()
    }

    /// Associate a source with its extracted identifier.
    ///
    /// Returns false when the identifier was already seen (from any source).
    pub fn record(&self, source: &str, id: &str) -> bool {
        let mut state = self.lock();
        state.by_source.insert(source.to_string(), id.to_string());
        state.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ids.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DedupState> {
        // A poisoned dedup index only ever means a panicking worker died
        // mid-insert; the set itself stays usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The extraction pipeline, configured once and shared across workers.
pub struct Extractor {
    config: ExtractionConfig,
    chain: ProviderChain,
    prompts: Arc<dyn PromptSource>,
    dedup: DedupIndex,
    shutdown: Shutdown,
}

impl Extractor {
    /// Build a pipeline with the built-in prompt templates.
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractError> {
        Self::with_prompt_source(config, Arc::new(BuiltinPrompts))
    }

    /// Build a pipeline with a caller-supplied prompt source.
    pub fn with_prompt_source(
        config: ExtractionConfig,
        prompts: Arc<dyn PromptSource>,
    ) -> Result<Self, ExtractError> {
        let chain = resolve_chain(&config)?;
        info!(providers = ?chain.provider_ids(), "extraction pipeline ready");
        Ok(Extractor {
            config,
            chain,
            prompts,
            dedup: DedupIndex::default(),
            shutdown: Shutdown::new(),
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Handle for cooperative cancellation: once requested, no new document
    /// and no new provider attempt is started; in-flight attempts finish.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Identifiers extracted so far in this run.
    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    /// Run one document through the full pipeline to a terminal result.
    ///
    /// Never returns an error: every failure is converted into the result's
    /// error list together with the stage it occurred at.
    pub async fn extract_document(
        &self,
        doc: DocumentInput,
        category: VendorCategory,
    ) -> ExtractionResult {
        let start = Instant::now();
        let source_file = doc.source.clone();
        info!(file = %source_file, category = %category, "processing document");

        if self.shutdown.is_requested() {
            return ExtractionResult::failed(&source_file, ExtractError::ShutdownRequested.to_string());
        }

        // ── Step 1: advisory dedup check ─────────────────────────────────
        if !self.config.reprocess_duplicates {
            if let Some(id) = self.dedup.known_id_for(&source_file) {
                info!(file = %source_file, invoice_id = %id, "skipping previously extracted source");
                return ExtractionResult {
                    invoice: None,
                    success: false,
                    source: None,
                    confidence: 0.0,
                    latency_ms: start.elapsed().as_millis() as u64,
                    tokens_used: None,
                    errors: Vec::new(),
                    warnings: vec![format!(
                        "skipped: source already extracted as '{id}' in this run"
                    )],
                    raw_response: None,
                    input_file: source_file,
                };
            }
        }

        // ── Step 2: normalize pages ──────────────────────────────────────
        let pages = match normalize::normalize(doc.bytes, doc.format, self.config.max_image_dim).await
        {
            Ok(pages) => pages,
            Err(e) => {
                return self.fail(&source_file, start, format!("Image processing failed: {e}"))
            }
        };
        debug!(pages = pages.len(), "document normalized");

        // ── Step 3: build the extraction prompt ──────────────────────────
        let prompt = match self.prompts.fetch_template(category) {
            Ok(template) => {
                prompts::build_extraction_prompt(&template, prompts::extraction_schema_json())
            }
            Err(e) => return self.fail(&source_file, start, format!("Prompt loading failed: {e}")),
        };

        // ── Step 4: encode pages for the request body ────────────────────
        let images = match encode::encode_pages(&pages) {
            Ok(images) => images,
            Err(e) => {
                return self.fail(&source_file, start, format!("Image processing failed: {e}"))
            }
        };
        drop(pages);

        // ── Step 5: provider chain with retry and fallback ───────────────
        let response = match self.chain.extract(&images, &prompt, &self.shutdown).await {
            Ok(response) => response,
            Err(ExtractError::ProvidersExhausted { failures }) => {
                return ExtractionResult {
                    invoice: None,
                    success: false,
                    source: None,
                    confidence: 0.0,
                    latency_ms: start.elapsed().as_millis() as u64,
                    tokens_used: None,
                    errors: failures,
                    warnings: Vec::new(),
                    raw_response: None,
                    input_file: source_file,
                };
            }
            Err(e) => return self.fail(&source_file, start, format!("Extraction failed: {e}")),
        };
        let raw_excerpt = excerpt(&response.text, self.config.raw_excerpt_limit);
        let tokens_used = response.usage.map(|u| u.total());

        // ── Step 6: three-layer validation ───────────────────────────────
        let (invoice, report) = run_validation(
            &response.text,
            None,
            &self.config.tolerances,
            &self.config.weights,
        );

        if !report.schema_valid {
            warn!(
                file = %source_file,
                errors = report.schema_errors.len(),
                "payload rejected by schema validation"
            );
            return ExtractionResult {
                invoice: None,
                success: false,
                source: Some(response.provider),
                confidence: 0.0,
                latency_ms: start.elapsed().as_millis() as u64,
                tokens_used,
                errors: report.schema_errors.iter().map(ToString::to_string).collect(),
                warnings: Vec::new(),
                raw_response: Some(raw_excerpt),
                input_file: source_file,
            };
        }

        let errors: Vec<String> = report
            .violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect();
        let mut warnings: Vec<String> = report
            .violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect();

        // ── Step 7: record the identifier, assemble the result ───────────
        let invoice = invoice.filter(|_| report.rules_valid);
        if let Some(ref inv) = invoice {
            let newly_seen = self.dedup.record(&source_file, &inv.invoice_id);
            if !newly_seen {
                warnings.push(format!(
                    "invoice '{}' was already extracted from another source in this run",
                    inv.invoice_id
                ));
            }
        }

        info!(
            file = %source_file,
            success = report.rules_valid,
            confidence = report.confidence,
            latency_ms = start.elapsed().as_millis() as u64,
            "document complete"
        );

        ExtractionResult {
            invoice,
            success: report.rules_valid,
            source: Some(response.provider),
            confidence: report.confidence,
            latency_ms: start.elapsed().as_millis() as u64,
            tokens_used,
            errors,
            warnings,
            raw_response: Some(raw_excerpt),
            input_file: source_file,
        }
    }

    /// Process many documents through a bounded worker pool, returning one
    /// result per input in completion order.
    pub async fn extract_batch(
        &self,
        docs: Vec<DocumentInput>,
        category: VendorCategory,
    ) -> Vec<ExtractionResult> {
        let total = docs.len();
        info!(documents = total, "starting batch");
        let results: Vec<ExtractionResult> = self.extract_stream(docs, category).collect().await;
        let succeeded = results.iter().filter(|r| r.success).count();
        info!(succeeded, total, "batch complete");
        results
    }

    fn fail(&self, source_file: &str, start: Instant, error: String) -> ExtractionResult {
        warn!(file = %source_file, %error, "document failed");
        let mut result = ExtractionResult::failed(source_file, error);
        result.latency_ms = start.elapsed().as_millis() as u64;
        result
    }
}

/// Build the provider chain: pre-built providers take precedence, otherwise
/// the named primary/fallback pair is instantiated through the factory.
fn resolve_chain(config: &ExtractionConfig) -> Result<ProviderChain, ExtractError> {
    let options = CallOptions {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let links = match &config.providers {
        Some(providers) if providers.is_empty() => {
            return Err(ExtractError::InvalidConfig(
                "pre-built provider chain must not be empty".into(),
            ));
        }
        Some(providers) => providers
            .iter()
            .enumerate()
            .map(|(pos, provider)| ChainLink {
                provider: Arc::clone(provider),
                retry: if pos == 0 {
                    config.primary_retry
                } else {
                    config.fallback_retry
                },
            })
            .collect(),
        None => vec![
            ChainLink {
                provider: Arc::new(VisionLlmProvider::from_name(
                    &config.primary.name,
                    &config.primary.model,
                    options,
                )?),
                retry: config.primary_retry,
            },
            ChainLink {
                provider: Arc::new(VisionLlmProvider::from_name(
                    &config.fallback.name,
                    &config.fallback.model,
                    options,
                )?),
                retry: config.fallback_retry,
            },
        ],
    };

    Ok(ProviderChain::new(links, config.attempt_timeout()))
}

/// Bounded excerpt of a provider payload, cut on a char boundary.
fn excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_index_tracks_sources_and_ids() {
        let dedup = DedupIndex::default();
        assert!(dedup.is_empty());
        assert_eq!(dedup.known_id_for("a.tiff"), None);

        assert!(dedup.record("a.tiff", "UE-2026-000001"));
        assert_eq!(dedup.known_id_for("a.tiff").as_deref(), Some("UE-2026-000001"));
        assert_eq!(dedup.len(), 1);

        // Same id from a different source is not newly seen.
        assert!(!dedup.record("b.tiff", "UE-2026-000001"));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("short", 100), "short");
        let cut = excerpt("aaaa££bb", 5); // '£' is 2 bytes; byte 5 splits it
        assert!(cut.starts_with("aaaa"));
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn empty_prebuilt_chain_rejected() {
        let config = ExtractionConfig {
            providers: Some(Vec::new()),
            ..ExtractionConfig::default()
        };
        assert!(matches!(
            resolve_chain(&config),
            Err(ExtractError::InvalidConfig(_))
        ));
    }
}
