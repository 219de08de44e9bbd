//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different provider backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! normalize ──▶ encode ──▶ gateway ──▶ payload ──▶ schema ──▶ rules ──▶ confidence
//! (decode+resize) (base64)  (LLM+retry)  (cleanup)   (typed)   (invariants) (score)
//! ```
//!
//! 1. [`normalize`] — decode TIFF/PNG/JPEG bytes into resized RGB pages;
//!    runs in `spawn_blocking` because image decoding is CPU-bound
//! 2. [`encode`]    — PNG-encode and base64-wrap each page for the
//!    multimodal API request body
//! 3. [`gateway`]   — drive the provider chain with retry/backoff/fallback;
//!    the only stage with network I/O
//! 4. [`payload`]   — deterministic cleanup of the raw response into a JSON
//!    candidate (fences, surrounding prose)
//! 5. [`schema`]    — parse the candidate into a typed invoice record or a
//!    complete list of field-level errors
//! 6. [`rules`]     — evaluate the cross-field business invariants
//! 7. [`confidence`] — fold completeness, rule passes, and provider
//!    confidence into one score

pub mod confidence;
pub mod encode;
pub mod gateway;
pub mod normalize;
pub mod payload;
pub mod rules;
pub mod schema;

use crate::config::{ConfidenceWeights, Tolerances};
use crate::model::{Invoice, Severity, ValidationReport};

/// Run the full three-layer validation over a raw provider response.
///
/// Schema rejection short-circuits the later layers (they require a typed
/// record); rule evaluation and scoring always run together. The record is
/// returned alongside the report so the caller can decide whether
/// error-severity violations withhold it from the final result.
pub fn run_validation(
    raw_text: &str,
    provider_confidence: Option<f64>,
    tolerances: &Tolerances,
    weights: &ConfidenceWeights,
) -> (Option<Invoice>, ValidationReport) {
    match schema::parse_candidate(raw_text) {
        Err(schema_errors) => (
            None,
            ValidationReport {
                schema_valid: false,
                rules_valid: false,
                confidence: 0.0,
                violations: Vec::new(),
                schema_errors,
            },
        ),
        Ok(invoice) => {
            let violations = rules::check_rules(&invoice, tolerances);
            let rules_valid = violations.iter().all(|v| v.severity != Severity::Error);
            let score = confidence::score(&invoice, &violations, provider_confidence, weights);
            let report = ValidationReport {
                schema_valid: true,
                rules_valid,
                confidence: score,
                violations,
                schema_errors: Vec::new(),
            };
            (Some(invoice), report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_layers_compose() {
        let payload = serde_json::json!({
            "invoice_id": "UE-2026-001234",
            "vendor_name": "Test Restaurant",
            "vendor_type": "ubereats",
            "invoice_date": "2026-01-15",
            "due_date": "2026-02-15",
            "currency": "USD",
            "line_items": [{"description": "Food Sales", "unit_price": "1000.00"}],
            "subtotal": "1000.00",
            "tax_amount": "50.00",
            "commission_rate": "0.15",
            "commission_amount": "150.00",
            "total_amount": "1050.00"
        });
        let (invoice, report) = run_validation(
            &payload.to_string(),
            None,
            &Tolerances::default(),
            &ConfidenceWeights::default(),
        );
        assert!(invoice.is_some());
        assert!(report.schema_valid);
        assert!(report.rules_valid);
        assert!(report.confidence >= 0.90);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn schema_failure_short_circuits() {
        let (invoice, report) = run_validation(
            "not json",
            None,
            &Tolerances::default(),
            &ConfidenceWeights::default(),
        );
        assert!(invoice.is_none());
        assert!(!report.schema_valid);
        assert!(!report.rules_valid);
        assert_eq!(report.confidence, 0.0);
        assert!(!report.schema_errors.is_empty());
    }
}
