//! Domain types for invoice extraction and validation.
//!
//! Everything a document turns into on its way through the pipeline lives
//! here: the typed invoice record, its line items, validation outcomes, and
//! the final [`ExtractionResult`] whose JSON shape is the external contract
//! consumed by downstream sinks (warehouse loaders, error stores).
//!
//! Money is [`rust_decimal::Decimal`] throughout — never a float — and dates
//! are [`chrono::NaiveDate`]. All values are created fresh per document and
//! immutable once constructed; nothing here outlives a single document's
//! processing.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier pattern shared by all vendor platforms:
/// 2–4 uppercase letters, a 4-digit year, a 4–8 digit sequence.
pub(crate) static INVOICE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2,4}-\d{4}-\d{4,8}$").unwrap());

/// Currency codes accepted at the schema layer.
pub(crate) const CURRENCIES: [&str; 6] = ["BRL", "USD", "EUR", "GBP", "CAD", "AUD"];

// ── Enums ────────────────────────────────────────────────────────────────

/// Delivery platform the invoice was issued by.
///
/// Drives prompt-template selection and the identifier-prefix check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorCategory {
    UberEats,
    DoorDash,
    GrubHub,
    Ifood,
    Rappi,
    #[default]
    Other,
}

impl VendorCategory {
    /// Lowercase wire name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorCategory::UberEats => "ubereats",
            VendorCategory::DoorDash => "doordash",
            VendorCategory::GrubHub => "grubhub",
            VendorCategory::Ifood => "ifood",
            VendorCategory::Rappi => "rappi",
            VendorCategory::Other => "other",
        }
    }

    /// Parse the lowercase wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ubereats" => Some(VendorCategory::UberEats),
            "doordash" => Some(VendorCategory::DoorDash),
            "grubhub" => Some(VendorCategory::GrubHub),
            "ifood" => Some(VendorCategory::Ifood),
            "rappi" => Some(VendorCategory::Rappi),
            "other" => Some(VendorCategory::Other),
            _ => None,
        }
    }

    /// Expected invoice-identifier prefix for this platform, if any.
    ///
    /// `Other` has no expectation — any well-formed identifier passes.
    pub fn id_prefix(&self) -> Option<&'static str> {
        match self {
            VendorCategory::UberEats => Some("UE"),
            VendorCategory::DoorDash => Some("DD"),
            VendorCategory::GrubHub => Some("GH"),
            VendorCategory::Ifood => Some("IF"),
            VendorCategory::Rappi => Some("RP"),
            VendorCategory::Other => None,
        }
    }

    /// All categories, for CLI help text and prompt-table tests.
    pub fn all() -> [VendorCategory; 6] {
        [
            VendorCategory::UberEats,
            VendorCategory::DoorDash,
            VendorCategory::GrubHub,
            VendorCategory::Ifood,
            VendorCategory::Rappi,
            VendorCategory::Other,
        ]
    }
}

impl fmt::Display for VendorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Line items ───────────────────────────────────────────────────────────

/// One invoice line.
///
/// The line total is **always derived** from `quantity * unit_price` via
/// [`LineItem::amount`]; there is deliberately no stored amount field, so a
/// stored total can never disagree with its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    /// Item or service description. Non-empty, ≤ 500 chars.
    pub description: String,
    /// Number of units. At least 1.
    pub quantity: u32,
    /// Price per unit in the invoice currency. Non-negative, 2 dp.
    pub unit_price: Decimal,
}

impl LineItem {
    /// Line total: `quantity * unit_price`, rounded to 2 decimal places.
    pub fn amount(&self) -> Decimal {
        (Decimal::from(self.quantity) * self.unit_price).round_dp(2)
    }
}

impl Serialize for LineItem {
    /// Serializes the derived `amount` alongside the stored fields so the
    /// external JSON carries the line total downstream consumers expect.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("LineItem", 4)?;
        s.serialize_field("description", &self.description)?;
        s.serialize_field("quantity", &self.quantity)?;
        s.serialize_field("unit_price", &self.unit_price)?;
        s.serialize_field("amount", &self.amount())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for LineItem {
    /// Accepts (and discards) an `amount` field if present — the total is
    /// recomputed from quantity and unit price on every access.
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            description: String,
            #[serde(default = "one")]
            quantity: u32,
            unit_price: Decimal,
        }
        fn one() -> u32 {
            1
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(LineItem {
            description: raw.description,
            quantity: raw.quantity,
            unit_price: raw.unit_price,
        })
    }
}

// ── Invoice record ───────────────────────────────────────────────────────

/// A schema-valid invoice record derived from a provider response.
///
/// Construction happens only in the schema-validation layer, which enforces
/// field-level constraints (presence, types, bounds, patterns). Cross-field
/// invariants — date ordering, reconciliation within tolerances — are the
/// business-rule layer's job and are *not* guaranteed by this type alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique invoice identifier, e.g. "UE-2026-001234".
    pub invoice_id: String,
    /// Restaurant or vendor name.
    pub vendor_name: String,
    /// Delivery platform type.
    pub vendor_type: VendorCategory,
    /// Invoice issue date.
    pub invoice_date: NaiveDate,
    /// Payment due date.
    pub due_date: NaiveDate,
    /// 3-letter ISO currency code.
    pub currency: String,
    /// Invoice lines, in document order.
    pub line_items: Vec<LineItem>,
    /// Sum of line items before tax and commission.
    pub subtotal: Decimal,
    /// Tax amount.
    pub tax_amount: Decimal,
    /// Platform commission rate as a fraction (0.15 = 15%).
    pub commission_rate: Decimal,
    /// Platform commission amount.
    pub commission_amount: Decimal,
    /// Final invoice total.
    pub total_amount: Decimal,
}

impl Invoice {
    /// Commission implied by the stated subtotal and rate, 2 dp.
    pub fn expected_commission(&self) -> Decimal {
        (self.subtotal * self.commission_rate).round_dp(2)
    }

    /// Sum of all derived line totals.
    pub fn line_items_total(&self) -> Decimal {
        self.line_items.iter().map(LineItem::amount).sum()
    }
}

// ── Validation outcomes ──────────────────────────────────────────────────

/// How severe a business-rule breach is.
///
/// `Error` blocks success; `Warning` is surfaced and lowers the confidence
/// score but does not block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A detected breach of one named business invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    /// Stable rule identifier, e.g. "date-order".
    pub rule: String,
    /// Human-readable description with the offending values.
    pub message: String,
    pub severity: Severity,
}

impl RuleViolation {
    pub(crate) fn new(rule: &str, message: String, severity: Severity) -> Self {
        RuleViolation {
            rule: rule.to_string(),
            message,
            severity,
        }
    }
}

/// A field-level constraint violation found while parsing a provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaError {
    /// Dotted path of the offending field, e.g. "line_items[2].unit_price".
    pub field: String,
    /// What constraint was broken.
    pub message: String,
}

impl SchemaError {
    pub(crate) fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Combined outcome of the three validation layers for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Layer 1: the payload parsed into a structurally complete record.
    pub schema_valid: bool,
    /// Layer 2: no error-severity rule violations.
    pub rules_valid: bool,
    /// Layer 3: weighted confidence score in [0, 1].
    pub confidence: f64,
    /// Every rule violation found, errors and warnings alike.
    pub violations: Vec<RuleViolation>,
    /// Field-level errors from the schema layer (empty when schema_valid).
    pub schema_errors: Vec<SchemaError>,
}

// ── Token accounting ─────────────────────────────────────────────────────

/// Token counts reported by a provider for one successful call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

// ── Final result ─────────────────────────────────────────────────────────

/// The terminal, serializable outcome of processing one document.
///
/// The JSON shape of this struct is the external contract every downstream
/// consumer depends on — field names and types here must not change without
/// coordinating with the sinks that parse them. Serializing and re-parsing a
/// result yields an equal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// The validated invoice, present only on success.
    pub invoice: Option<Invoice>,
    /// Whether the document passed schema and business-rule validation.
    pub success: bool,
    /// Identifier of the provider that produced the payload, if any made it.
    pub source: Option<String>,
    /// Confidence score in [0, 1]; reported regardless of outcome.
    pub confidence: f64,
    /// End-to-end processing time for this document.
    pub latency_ms: u64,
    /// Total tokens consumed, when the provider reported usage.
    pub tokens_used: Option<u64>,
    /// Terminal error descriptions (empty on success).
    pub errors: Vec<String>,
    /// Non-blocking warnings.
    pub warnings: Vec<String>,
    /// Bounded excerpt of the raw provider payload, for diagnostics.
    pub raw_response: Option<String>,
    /// Reference to the source file this result was produced from.
    pub input_file: String,
}

impl ExtractionResult {
    /// A failed result carrying one error, before any provider was reached.
    pub(crate) fn failed(input_file: &str, error: String) -> Self {
        ExtractionResult {
            invoice: None,
            success: false,
            source: None,
            confidence: 0.0,
            latency_ms: 0,
            tokens_used: None,
            errors: vec![error],
            warnings: Vec::new(),
            raw_response: None,
            input_file: input_file.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invoice() -> Invoice {
        Invoice {
            invoice_id: "UE-2026-001234".into(),
            vendor_name: "Test Restaurant ABC".into(),
            vendor_type: VendorCategory::UberEats,
            invoice_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 1, 29).unwrap(),
            currency: "USD".into(),
            line_items: vec![LineItem {
                description: "Order Sales".into(),
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
    fn line_item_amount_is_derived() {
        let item = LineItem {
            description: "Product".into(),
            quantity: 3,
            unit_price: Decimal::new(1050, 2), // 10.50
        };
        assert_eq!(item.amount(), Decimal::new(3150, 2)); // 31.50
    }

    #[test]
    fn line_item_serializes_derived_amount() {
        let item = LineItem {
            description: "Delivery Service Fee".into(),
            quantity: 2,
            unit_price: Decimal::new(1500, 2),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["amount"], serde_json::json!("30.00"));
    }

    #[test]
    fn line_item_deserialize_ignores_supplied_amount() {
        // A payload claiming amount=999.99 must not override the derived total.
        let item: LineItem = serde_json::from_str(
            r#"{"description":"Fees","quantity":2,"unit_price":"5.00","amount":"999.99"}"#,
        )
        .unwrap();
        assert_eq!(item.amount(), Decimal::new(1000, 2));
    }

    #[test]
    fn line_item_quantity_defaults_to_one() {
        let item: LineItem =
            serde_json::from_str(r#"{"description":"Fees","unit_price":"5.00"}"#).unwrap();
        assert_eq!(item.quantity, 1);
    }

    #[test]
    fn vendor_category_round_trip() {
        for cat in VendorCategory::all() {
            assert_eq!(VendorCategory::parse(cat.as_str()), Some(cat));
            let json = serde_json::to_string(&cat).unwrap();
            assert_eq!(json, format!("\"{}\"", cat.as_str()));
        }
    }

    #[test]
    fn expected_commission_rounds_to_cents() {
        let inv = sample_invoice();
        assert_eq!(inv.expected_commission(), Decimal::new(15000, 2));
    }

    #[test]
    fn extraction_result_json_round_trip() {
        let result = ExtractionResult {
            invoice: Some(sample_invoice()),
            success: true,
            source: Some("gemini".into()),
            confidence: 0.94,
            latency_ms: 1500,
            tokens_used: Some(2048),
            errors: vec![],
            warnings: vec!["line item sum differs from subtotal by 0.08".into()],
            raw_response: Some("{\"invoice_id\": …".into()),
            input_file: "data/input/invoice_001.tiff".into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: ExtractionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn extraction_result_contract_fields() {
        // The external JSON shape: downstream loaders parse exactly these keys.
        let result = ExtractionResult::failed("in.tiff", "boom".into());
        let json = serde_json::to_value(&result).unwrap();
        for key in [
            "invoice",
            "success",
            "source",
            "confidence",
            "latency_ms",
            "tokens_used",
            "errors",
            "warnings",
            "input_file",
        ] {
            assert!(json.get(key).is_some(), "missing contract field {key}");
        }
        assert_eq!(json["invoice"], serde_json::Value::Null);
        assert_eq!(json["success"], serde_json::json!(false));
    }

    #[test]
    fn invoice_id_pattern_accepts_platform_ids() {
        assert!(INVOICE_ID_RE.is_match("UE-2026-001234"));
        assert!(INVOICE_ID_RE.is_match("INV-2025-12345678"));
        assert!(!INVOICE_ID_RE.is_match("INVALID"));
        assert!(!INVOICE_ID_RE.is_match("ue-2026-001234"));
    }
}
