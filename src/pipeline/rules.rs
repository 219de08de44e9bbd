//! Business-rule validation (layer 2): cross-field invariants.
//!
//! Every rule is evaluated independently — no short-circuiting — so the
//! caller always receives the complete violation set for a record. A record
//! with at least one error-severity violation is business-rule-invalid;
//! warnings are surfaced and lower the confidence score but do not block.
//!
//! | Rule | Check | Tolerance | Severity |
//! |------|-------|-----------|----------|
//! | date-order | due_date ≥ invoice_date | exact | error |
//! | commission-reconciliation | commission ≈ subtotal × rate | configurable (±0.02) | error |
//! | total-reconciliation | total ≈ subtotal + tax | configurable (±0.05) | error |
//! | line-item-sum | Σ line amounts ≈ subtotal | configurable (±0.10) | warning |
//! | non-negativity | all money ≥ 0 | exact | error |
//! | identifier-format | id prefix matches category | exact | warning |

use crate::config::Tolerances;
use crate::model::{Invoice, RuleViolation, Severity};
use rust_decimal::Decimal;

/// Number of independently evaluated rules; the confidence scorer's
/// consistency ratio is "rules passed / RULE_COUNT".
pub const RULE_COUNT: usize = 6;

pub const DATE_ORDER: &str = "date-order";
pub const COMMISSION_RECONCILIATION: &str = "commission-reconciliation";
pub const TOTAL_RECONCILIATION: &str = "total-reconciliation";
pub const LINE_ITEM_SUM: &str = "line-item-sum";
pub const NON_NEGATIVITY: &str = "non-negativity";
pub const IDENTIFIER_FORMAT: &str = "identifier-format";

/// Evaluate every rule against a schema-valid record.
///
/// At most one violation per rule is produced; the returned list is empty
/// when the record is fully consistent.
pub fn check_rules(invoice: &Invoice, tolerances: &Tolerances) -> Vec<RuleViolation> {
    let mut violations = Vec::new();

    // date-order
    if invoice.due_date < invoice.invoice_date {
        violations.push(RuleViolation::new(
            DATE_ORDER,
            format!(
                "due_date ({}) is before invoice_date ({})",
                invoice.due_date, invoice.invoice_date
            ),
            Severity::Error,
        ));
    }

    // commission-reconciliation
    let expected_commission = invoice.expected_commission();
    let commission_diff = (invoice.commission_amount - expected_commission).abs();
    if commission_diff > tolerances.commission {
        violations.push(RuleViolation::new(
            COMMISSION_RECONCILIATION,
            format!(
                "commission_amount ({}) does not match subtotal * commission_rate ({}), difference {}",
                invoice.commission_amount, expected_commission, commission_diff
            ),
            Severity::Error,
        ));
    }

    // total-reconciliation
    let expected_total = invoice.subtotal + invoice.tax_amount;
    let total_diff = (invoice.total_amount - expected_total).abs();
    if total_diff > tolerances.total {
        violations.push(RuleViolation::new(
            TOTAL_RECONCILIATION,
            format!(
                "total_amount ({}) does not match subtotal + tax_amount ({}), difference {}",
                invoice.total_amount, expected_total, total_diff
            ),
            Severity::Error,
        ));
    }

    // line-item-sum — only meaningful when line items were extracted at all
    if !invoice.line_items.is_empty() {
        let items_total = invoice.line_items_total();
        let items_diff = (items_total - invoice.subtotal).abs();
        if items_diff > tolerances.line_item_sum {
            violations.push(RuleViolation::new(
                LINE_ITEM_SUM,
                format!(
                    "line items sum to {} but subtotal is {}, difference {}",
                    items_total, invoice.subtotal, items_diff
                ),
                Severity::Warning,
            ));
        }
    }

    // non-negativity
    if let Some((name, value)) = first_negative_amount(invoice) {
        violations.push(RuleViolation::new(
            NON_NEGATIVITY,
            format!("{name} is negative: {value}"),
            Severity::Error,
        ));
    }

    // identifier-format
    if let Some(prefix) = invoice.vendor_type.id_prefix() {
        if !invoice.invoice_id.starts_with(&format!("{prefix}-")) {
            violations.push(RuleViolation::new(
                IDENTIFIER_FORMAT,
                format!(
                    "invoice_id '{}' does not carry the '{prefix}-' prefix expected for {}",
                    invoice.invoice_id, invoice.vendor_type
                ),
                Severity::Warning,
            ));
        }
    }

    violations
}

/// First monetary field below zero, if any.
///
/// The schema layer already rejects negative money, so this fires only for
/// records constructed through other paths; it stays a rule of its own so
/// the pass ratio counts it.
fn first_negative_amount(invoice: &Invoice) -> Option<(String, Decimal)> {
    let named = [
        ("subtotal", invoice.subtotal),
        ("tax_amount", invoice.tax_amount),
        ("commission_amount", invoice.commission_amount),
        ("total_amount", invoice.total_amount),
    ];
    for (name, value) in named {
        if value.is_sign_negative() {
            return Some((name.to_string(), value));
        }
    }
    for (idx, item) in invoice.line_items.iter().enumerate() {
        if item.unit_price.is_sign_negative() {
            return Some((format!("line_items[{idx}].unit_price"), item.unit_price));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LineItem, VendorCategory};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Fully consistent record: subtotal 1000, tax 50, rate 0.15,
    /// commission 150, total 1050.
    fn consistent_invoice() -> Invoice {
        Invoice {
            invoice_id: "UE-2026-001234".into(),
            vendor_name: "Test Restaurant".into(),
            vendor_type: VendorCategory::UberEats,
            invoice_date: date(2026, 1, 15),
            due_date: date(2026, 2, 15),
            currency: "USD".into(),
            line_items: vec![LineItem {
                description: "Food Sales".into(),
                quantity: 1,
                unit_price: Decimal::new(100000, 2),
            }],
            subtotal: Decimal::new(100000, 2),
            tax_amount: Decimal::new(5000, 2),
            commission_rate: Decimal::new(15, 2),
            commission_amount: Decimal::new(15000, 2),
            total_amount: Decimal::new(105000, 2),
        }
    }

    #[test]
    fn consistent_record_has_no_violations() {
        let violations = check_rules(&consistent_invoice(), &Tolerances::default());
        assert!(violations.is_empty(), "got: {violations:?}");
    }

    #[test]
    fn reversed_dates_are_an_error() {
        let mut invoice = consistent_invoice();
        invoice.invoice_date = date(2026, 2, 10);
        invoice.due_date = date(2026, 2, 1);
        let violations = check_rules(&invoice, &Tolerances::default());
        let v = violations.iter().find(|v| v.rule == DATE_ORDER).unwrap();
        assert_eq!(v.severity, Severity::Error);
    }

    #[test]
    fn same_day_due_date_passes() {
        let mut invoice = consistent_invoice();
        invoice.due_date = invoice.invoice_date;
        let violations = check_rules(&invoice, &Tolerances::default());
        assert!(violations.iter().all(|v| v.rule != DATE_ORDER));
    }

    #[test]
    fn commission_outside_tolerance_is_an_error() {
        let mut invoice = consistent_invoice();
        invoice.commission_amount = Decimal::new(10000, 2); // expected 150.00
        let violations = check_rules(&invoice, &Tolerances::default());
        let v = violations
            .iter()
            .find(|v| v.rule == COMMISSION_RECONCILIATION)
            .unwrap();
        assert_eq!(v.severity, Severity::Error);
        assert!(v.message.contains("150.00"));
    }

    #[test]
    fn commission_within_tolerance_passes() {
        let mut invoice = consistent_invoice();
        invoice.commission_amount = Decimal::new(15002, 2); // 150.02, diff exactly at bound
        let violations = check_rules(&invoice, &Tolerances::default());
        assert!(violations.iter().all(|v| v.rule != COMMISSION_RECONCILIATION));
    }

    #[test]
    fn total_mismatch_is_an_error_in_both_directions() {
        for cents in [104000, 106000] {
            let mut invoice = consistent_invoice();
            invoice.total_amount = Decimal::new(cents, 2);
            let violations = check_rules(&invoice, &Tolerances::default());
            assert!(
                violations.iter().any(|v| v.rule == TOTAL_RECONCILIATION),
                "total {cents} should violate"
            );
        }
    }

    #[test]
    fn line_item_drift_is_a_warning() {
        let mut invoice = consistent_invoice();
        invoice.line_items[0].unit_price = Decimal::new(99000, 2); // sum 990 vs subtotal 1000
        let violations = check_rules(&invoice, &Tolerances::default());
        let v = violations.iter().find(|v| v.rule == LINE_ITEM_SUM).unwrap();
        assert_eq!(v.severity, Severity::Warning);
    }

    #[test]
    fn no_line_items_skips_sum_rule() {
        let mut invoice = consistent_invoice();
        invoice.line_items.clear();
        let violations = check_rules(&invoice, &Tolerances::default());
        assert!(violations.iter().all(|v| v.rule != LINE_ITEM_SUM));
    }

    #[test]
    fn foreign_prefix_is_a_warning() {
        let mut invoice = consistent_invoice();
        invoice.invoice_id = "DD-2026-001234".into(); // DoorDash id on an UberEats invoice
        let violations = check_rules(&invoice, &Tolerances::default());
        let v = violations
            .iter()
            .find(|v| v.rule == IDENTIFIER_FORMAT)
            .unwrap();
        assert_eq!(v.severity, Severity::Warning);
    }

    #[test]
    fn other_category_accepts_any_prefix() {
        let mut invoice = consistent_invoice();
        invoice.vendor_type = VendorCategory::Other;
        invoice.invoice_id = "INV-2026-009999".into();
        let violations = check_rules(&invoice, &Tolerances::default());
        assert!(violations.iter().all(|v| v.rule != IDENTIFIER_FORMAT));
    }

    #[test]
    fn every_rule_reports_without_short_circuit() {
        let mut invoice = consistent_invoice();
        invoice.invoice_date = date(2026, 2, 10);
        invoice.due_date = date(2026, 2, 1);
        invoice.commission_amount = Decimal::new(99900, 2);
        invoice.total_amount = Decimal::new(999900, 2);
        invoice.line_items[0].unit_price = Decimal::new(1, 2);
        invoice.invoice_id = "ZZ-2026-000001".into();
        let violations = check_rules(&invoice, &Tolerances::default());
        assert_eq!(violations.len(), 5); // all but non-negativity
    }

    #[test]
    fn wider_tolerances_accept_more() {
        let mut invoice = consistent_invoice();
        invoice.commission_amount = Decimal::new(15500, 2); // off by 5.00
        let wide = Tolerances {
            commission: Decimal::new(1000, 2),
            ..Tolerances::default()
        };
        assert!(check_rules(&invoice, &wide)
            .iter()
            .all(|v| v.rule != COMMISSION_RECONCILIATION));
    }
}
