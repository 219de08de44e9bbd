//! Confidence scoring (layer 3): one quality number per record.
//!
//! `confidence = w_completeness * completeness
//!             + w_consistency * consistency
//!             + w_provider * provider_confidence`
//!
//! * `completeness` — fraction of the required-field list that is
//!   non-null/non-empty on the record.
//! * `consistency` — fraction of business rules that passed. Errors and
//!   warnings both count as failures here: a warning does not block
//!   success, but it does mean the record is less internally consistent.
//! * `provider_confidence` — the provider's self-reported score when
//!   available, otherwise the configured default.
//!
//! The result is clamped to [0, 1]. With the default weights a fully
//! complete, fully consistent record with no provider score lands at
//! 0.40 + 0.30 + 0.30 × 0.80 = 0.94.

use crate::config::ConfidenceWeights;
use crate::model::{Invoice, RuleViolation};
use crate::pipeline::rules::RULE_COUNT;
use std::collections::HashSet;

/// Fields a usable financial record cannot do without. Dates and amounts
/// are structurally present on a typed record; the string fields can still
/// be blank-ish and are checked for content.
const REQUIRED_FIELD_COUNT: usize = 6;

/// Combine completeness, rule passes, and provider confidence into [0, 1].
pub fn score(
    invoice: &Invoice,
    violations: &[RuleViolation],
    provider_confidence: Option<f64>,
    weights: &ConfidenceWeights,
) -> f64 {
    let completeness = completeness_ratio(invoice);

    let failed_rules: HashSet<&str> = violations.iter().map(|v| v.rule.as_str()).collect();
    let passed = RULE_COUNT.saturating_sub(failed_rules.len());
    let consistency = passed as f64 / RULE_COUNT as f64;

    let provider = provider_confidence
        .unwrap_or(weights.provider_default)
        .clamp(0.0, 1.0);

    let combined = weights.completeness * completeness
        + weights.consistency * consistency
        + weights.provider * provider;

    combined.clamp(0.0, 1.0)
}

/// Fraction of the required-field list carrying a usable value.
fn completeness_ratio(invoice: &Invoice) -> f64 {
    let present = [
        !invoice.invoice_id.trim().is_empty(),
        !invoice.vendor_name.trim().is_empty(),
        true, // invoice_date: typed NaiveDate, structurally present
        true, // due_date
        true, // subtotal
        true, // total_amount
    ];
    debug_assert_eq!(present.len(), REQUIRED_FIELD_COUNT);
    let count = present.iter().filter(|p| **p).count();
    count as f64 / REQUIRED_FIELD_COUNT as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Severity, VendorCategory};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn invoice() -> Invoice {
        Invoice {
            invoice_id: "UE-2026-001234".into(),
            vendor_name: "Test Restaurant".into(),
            vendor_type: VendorCategory::UberEats,
            invoice_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 2, 15).unwrap(),
            currency: "USD".into(),
            line_items: vec![],
            subtotal: Decimal::new(100000, 2),
            tax_amount: Decimal::new(5000, 2),
            commission_rate: Decimal::new(15, 2),
            commission_amount: Decimal::new(15000, 2),
            total_amount: Decimal::new(105000, 2),
        }
    }

    fn violation(rule: &str, severity: Severity) -> RuleViolation {
        RuleViolation {
            rule: rule.into(),
            message: "test".into(),
            severity,
        }
    }

    #[test]
    fn clean_record_scores_default_baseline() {
        let score = score(&invoice(), &[], None, &ConfidenceWeights::default());
        assert!((score - 0.94).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn provider_confidence_replaces_default() {
        let w = ConfidenceWeights::default();
        let with_provider = score(&invoice(), &[], Some(1.0), &w);
        assert!((with_provider - 0.97).abs() < 1e-9, "got {with_provider}");
    }

    #[test]
    fn score_decreases_with_each_failed_rule() {
        let w = ConfidenceWeights::default();
        let mut last = score(&invoice(), &[], None, &w);
        let rules = ["date-order", "commission-reconciliation", "line-item-sum"];
        for n in 1..=rules.len() {
            let violations: Vec<RuleViolation> = rules[..n]
                .iter()
                .map(|r| violation(r, Severity::Error))
                .collect();
            let s = score(&invoice(), &violations, None, &w);
            assert!(s < last, "score should strictly decrease: {s} !< {last}");
            last = s;
        }
    }

    #[test]
    fn warnings_count_against_consistency() {
        let w = ConfidenceWeights::default();
        let clean = score(&invoice(), &[], None, &w);
        let warned = score(
            &invoice(),
            &[violation("line-item-sum", Severity::Warning)],
            None,
            &w,
        );
        assert!(warned < clean);
    }

    #[test]
    fn score_always_in_unit_interval() {
        let w = ConfidenceWeights::default();
        let all_failed: Vec<RuleViolation> = [
            "date-order",
            "commission-reconciliation",
            "total-reconciliation",
            "line-item-sum",
            "non-negativity",
            "identifier-format",
        ]
        .iter()
        .map(|r| violation(r, Severity::Error))
        .collect();

        for provider in [None, Some(-1.0), Some(0.0), Some(0.5), Some(2.0)] {
            let s = score(&invoice(), &all_failed, provider, &w);
            assert!((0.0..=1.0).contains(&s), "got {s}");
            let s = score(&invoice(), &[], provider, &w);
            assert!((0.0..=1.0).contains(&s), "got {s}");
        }
    }

    #[test]
    fn blank_required_strings_lower_completeness() {
        let mut inv = invoice();
        inv.vendor_name = "  ".into();
        let w = ConfidenceWeights::default();
        let degraded = score(&inv, &[], None, &w);
        let clean = score(&invoice(), &[], None, &w);
        assert!(degraded < clean);
    }
}
