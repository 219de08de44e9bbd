//! Schema validation (layer 1): raw provider text → typed [`Invoice`].
//!
//! All-or-nothing: a record is returned only when every field-level
//! constraint holds; otherwise the *complete* list of violations comes back,
//! not just the first, so one round-trip to the logs shows everything wrong
//! with a payload. Downstream layers assume structural completeness, which
//! is why partial records are never returned from here.
//!
//! Constraints enforced: required-field presence, type conformance (dates as
//! calendar dates, money as fixed-point decimals, category from the closed
//! enumeration), the identifier pattern, and bounds (commission rate in
//! [0, 1], quantities ≥ 1, money non-negative, decimal-place limits).

use crate::model::{Invoice, LineItem, SchemaError, VendorCategory, CURRENCIES, INVOICE_ID_RE};
use crate::pipeline::payload;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Longest accepted identifier / name / description, matching the widths
/// the downstream warehouse columns were provisioned with.
const MAX_ID_LEN: usize = 50;
const MAX_NAME_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_QUANTITY: u64 = 1_000;

/// Parse and validate a raw provider response into an [`Invoice`].
///
/// Returns every violation found; the record is rejected as a whole if any
/// single constraint fails.
pub fn parse_candidate(raw_text: &str) -> Result<Invoice, Vec<SchemaError>> {
    let cleaned = payload::extract_json_payload(raw_text);

    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| vec![SchemaError::new("$", format!("invalid JSON payload: {e}"))])?;
    let Some(map) = value.as_object() else {
        return Err(vec![SchemaError::new("$", "payload is not a JSON object")]);
    };

    let mut errors: Vec<SchemaError> = Vec::new();

    let invoice_id = required_string(map, "invoice_id", MAX_ID_LEN, &mut errors);
    if let Some(id) = invoice_id.as_deref() {
        if !INVOICE_ID_RE.is_match(id) {
            errors.push(SchemaError::new(
                "invoice_id",
                format!("'{id}' does not match the identifier pattern AA-YYYY-NNNN"),
            ));
        }
    }

    let vendor_name = required_string(map, "vendor_name", MAX_NAME_LEN, &mut errors);
    let vendor_type = parse_category(map, &mut errors);
    let invoice_date = required_date(map, "invoice_date", &mut errors);
    let due_date = required_date(map, "due_date", &mut errors);
    let currency = parse_currency(map, &mut errors);
    let line_items = parse_line_items(map, &mut errors);

    let subtotal = required_money(map, "subtotal", &mut errors);
    let tax_amount = optional_money(map, "tax_amount", &mut errors);
    let commission_rate = parse_commission_rate(map, &mut errors);
    let commission_amount = optional_money(map, "commission_amount", &mut errors);
    let total_amount = required_money(map, "total_amount", &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    // Every Option below is Some once the error list is empty; the match
    // keeps that invariant checked instead of assumed.
    match (
        invoice_id,
        vendor_name,
        vendor_type,
        invoice_date,
        due_date,
        currency,
        line_items,
        subtotal,
        tax_amount,
        commission_rate,
        commission_amount,
        total_amount,
    ) {
        (
            Some(invoice_id),
            Some(vendor_name),
            Some(vendor_type),
            Some(invoice_date),
            Some(due_date),
            Some(currency),
            Some(line_items),
            Some(subtotal),
            Some(tax_amount),
            Some(commission_rate),
            Some(commission_amount),
            Some(total_amount),
        ) => Ok(Invoice {
            invoice_id,
            vendor_name,
            vendor_type,
            invoice_date,
            due_date,
            currency,
            line_items,
            subtotal,
            tax_amount,
            commission_rate,
            commission_amount,
            total_amount,
        }),
        _ => Err(vec![SchemaError::new(
            "$",
            "field rejected without a recorded violation",
        )]),
    }
}

// ── Field extraction helpers ─────────────────────────────────────────────

fn required_string(
    map: &Map<String, Value>,
    field: &str,
    max_len: usize,
    errors: &mut Vec<SchemaError>,
) -> Option<String> {
    match map.get(field) {
        None | Some(Value::Null) => {
            errors.push(SchemaError::new(field, "required field is missing"));
            None
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                errors.push(SchemaError::new(field, "must not be empty"));
                None
            } else if trimmed.chars().count() > max_len {
                errors.push(SchemaError::new(
                    field,
                    format!("longer than {max_len} characters"),
                ));
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(other) => {
            errors.push(SchemaError::new(
                field,
                format!("expected a string, got {}", json_type(other)),
            ));
            None
        }
    }
}

fn required_date(
    map: &Map<String, Value>,
    field: &str,
    errors: &mut Vec<SchemaError>,
) -> Option<NaiveDate> {
    match map.get(field) {
        None | Some(Value::Null) => {
            errors.push(SchemaError::new(field, "required field is missing"));
            None
        }
        Some(Value::String(s)) => match NaiveDate::from_str(s.trim()) {
            Ok(date) => Some(date),
            Err(_) => {
                errors.push(SchemaError::new(
                    field,
                    format!("'{s}' is not a calendar date (expected YYYY-MM-DD)"),
                ));
                None
            }
        },
        Some(other) => {
            errors.push(SchemaError::new(
                field,
                format!("expected a YYYY-MM-DD string, got {}", json_type(other)),
            ));
            None
        }
    }
}

/// Parse a monetary value: decimal, non-negative, at most 2 decimal places.
fn money_from(value: &Value, field: &str, errors: &mut Vec<SchemaError>) -> Option<Decimal> {
    let d = match decimal_from(value) {
        Ok(d) => d,
        Err(msg) => {
            errors.push(SchemaError::new(field, msg));
            return None;
        }
    };
    if d.is_sign_negative() {
        errors.push(SchemaError::new(field, format!("must be non-negative, got {d}")));
        return None;
    }
    if d.scale() > 2 && d.normalize().scale() > 2 {
        errors.push(SchemaError::new(
            field,
            format!("more than 2 decimal places: {d}"),
        ));
        return None;
    }
    Some(d.round_dp(2))
}

fn required_money(
    map: &Map<String, Value>,
    field: &str,
    errors: &mut Vec<SchemaError>,
) -> Option<Decimal> {
    match map.get(field) {
        None | Some(Value::Null) => {
            errors.push(SchemaError::new(field, "required field is missing"));
            None
        }
        Some(value) => money_from(value, field, errors),
    }
}

/// Missing or null optional money fields default to zero, the way invoices
/// omit tax or commission lines that do not apply.
fn optional_money(
    map: &Map<String, Value>,
    field: &str,
    errors: &mut Vec<SchemaError>,
) -> Option<Decimal> {
    match map.get(field) {
        None | Some(Value::Null) => Some(Decimal::ZERO),
        Some(value) => money_from(value, field, errors),
    }
}

fn parse_commission_rate(
    map: &Map<String, Value>,
    errors: &mut Vec<SchemaError>,
) -> Option<Decimal> {
    const FIELD: &str = "commission_rate";
    let value = match map.get(FIELD) {
        None | Some(Value::Null) => return Some(Decimal::ZERO),
        Some(v) => v,
    };
    let d = match decimal_from(value) {
        Ok(d) => d,
        Err(msg) => {
            errors.push(SchemaError::new(FIELD, msg));
            return None;
        }
    };
    if d.is_sign_negative() || d > Decimal::ONE {
        errors.push(SchemaError::new(
            FIELD,
            format!("must be a fraction in [0, 1], got {d}"),
        ));
        return None;
    }
    Some(d.round_dp(4))
}

fn parse_category(
    map: &Map<String, Value>,
    errors: &mut Vec<SchemaError>,
) -> Option<VendorCategory> {
    match map.get("vendor_type") {
        None | Some(Value::Null) => Some(VendorCategory::Other),
        Some(Value::String(s)) => match VendorCategory::parse(&s.to_ascii_lowercase()) {
            Some(cat) => Some(cat),
            None => {
                errors.push(SchemaError::new(
                    "vendor_type",
                    format!("'{s}' is not a known vendor category"),
                ));
                None
            }
        },
        Some(other) => {
            errors.push(SchemaError::new(
                "vendor_type",
                format!("expected a string, got {}", json_type(other)),
            ));
            None
        }
    }
}

fn parse_currency(map: &Map<String, Value>, errors: &mut Vec<SchemaError>) -> Option<String> {
    match map.get("currency") {
        // Platform invoices in the training corpus overwhelmingly default
        // to BRL when the currency line is absent.
        None | Some(Value::Null) => Some("BRL".to_string()),
        Some(Value::String(s)) => {
            let upper = s.trim().to_ascii_uppercase();
            if CURRENCIES.contains(&upper.as_str()) {
                Some(upper)
            } else {
                errors.push(SchemaError::new(
                    "currency",
                    format!("'{s}' is not one of {}", CURRENCIES.join(", ")),
                ));
                None
            }
        }
        Some(other) => {
            errors.push(SchemaError::new(
                "currency",
                format!("expected a string, got {}", json_type(other)),
            ));
            None
        }
    }
}

fn parse_line_items(
    map: &Map<String, Value>,
    errors: &mut Vec<SchemaError>,
) -> Option<Vec<LineItem>> {
    let items = match map.get("line_items") {
        None | Some(Value::Null) => return Some(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            errors.push(SchemaError::new(
                "line_items",
                format!("expected an array, got {}", json_type(other)),
            ));
            return None;
        }
    };

    let before = errors.len();
    let mut parsed = Vec::with_capacity(items.len());

    for (idx, item) in items.iter().enumerate() {
        let path = |sub: &str| format!("line_items[{idx}].{sub}");
        let Some(obj) = item.as_object() else {
            errors.push(SchemaError::new(
                format!("line_items[{idx}]"),
                format!("expected an object, got {}", json_type(item)),
            ));
            continue;
        };

        let description = match obj.get("description") {
            Some(Value::String(s)) if !s.trim().is_empty() => {
                let trimmed = s.trim();
                if trimmed.chars().count() > MAX_DESCRIPTION_LEN {
                    errors.push(SchemaError::new(
                        path("description"),
                        format!("longer than {MAX_DESCRIPTION_LEN} characters"),
                    ));
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Some(Value::String(_)) => {
                errors.push(SchemaError::new(path("description"), "must not be empty"));
                None
            }
            None | Some(Value::Null) => {
                errors.push(SchemaError::new(path("description"), "required field is missing"));
                None
            }
            Some(other) => {
                errors.push(SchemaError::new(
                    path("description"),
                    format!("expected a string, got {}", json_type(other)),
                ));
                None
            }
        };

        let quantity = match obj.get("quantity") {
            None | Some(Value::Null) => Some(1u32),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(q) if (1..=MAX_QUANTITY).contains(&q) => Some(q as u32),
                _ => {
                    errors.push(SchemaError::new(
                        path("quantity"),
                        format!("must be an integer in [1, {MAX_QUANTITY}], got {n}"),
                    ));
                    None
                }
            },
            Some(other) => {
                errors.push(SchemaError::new(
                    path("quantity"),
                    format!("expected an integer, got {}", json_type(other)),
                ));
                None
            }
        };

        let unit_price = match obj.get("unit_price") {
            None | Some(Value::Null) => {
                errors.push(SchemaError::new(path("unit_price"), "required field is missing"));
                None
            }
            Some(value) => money_from(value, &path("unit_price"), errors),
        };

        if let (Some(description), Some(quantity), Some(unit_price)) =
            (description, quantity, unit_price)
        {
            parsed.push(LineItem {
                description,
                quantity,
                unit_price,
            });
        }
    }

    if errors.len() > before {
        None
    } else {
        Some(parsed)
    }
}

/// Parse a decimal from a JSON string or number.
///
/// Numbers go through their textual form so binary float artefacts
/// (1.1500000000000001) never leak into a fixed-point amount.
fn decimal_from(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim())
            .map_err(|_| format!("'{s}' is not a decimal number")),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|_| format!("'{n}' is not representable as a decimal")),
        other => Err(format!(
            "expected a number or numeric string, got {}",
            json_type(other)
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> serde_json::Value {
        serde_json::json!({
            "invoice_id": "UE-2026-001234",
            "vendor_name": "Test Restaurant ABC",
            "vendor_type": "ubereats",
            "invoice_date": "2026-01-15",
            "due_date": "2026-01-29",
            "currency": "USD",
            "line_items": [
                {"description": "Order Sales", "quantity": 1, "unit_price": "1000.00"},
                {"description": "Delivery Fees", "quantity": 1, "unit_price": "150.00"}
            ],
            "subtotal": "1150.00",
            "tax_amount": "0.00",
            "commission_rate": "0.20",
            "commission_amount": "230.00",
            "total_amount": "1150.00"
        })
    }

    #[test]
    fn well_formed_payload_parses() {
        let invoice = parse_candidate(&valid_payload().to_string()).expect("should parse");
        assert_eq!(invoice.invoice_id, "UE-2026-001234");
        assert_eq!(invoice.vendor_type, VendorCategory::UberEats);
        assert_eq!(invoice.line_items.len(), 2);
        assert_eq!(invoice.subtotal, Decimal::new(115000, 2));
    }

    #[test]
    fn fenced_payload_parses() {
        let raw = format!("```json\n{}\n```", valid_payload());
        assert!(parse_candidate(&raw).is_ok());
    }

    #[test]
    fn missing_invoice_id_rejected() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("invoice_id");
        let errors = parse_candidate(&payload.to_string()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "invoice_id"));
    }

    #[test]
    fn all_errors_are_collected() {
        let mut payload = valid_payload();
        let map = payload.as_object_mut().unwrap();
        map.remove("invoice_id");
        map.insert("subtotal".into(), serde_json::json!("-5.00"));
        map.insert("commission_rate".into(), serde_json::json!("1.5"));
        let errors = parse_candidate(&payload.to_string()).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"invoice_id"));
        assert!(fields.contains(&"subtotal"));
        assert!(fields.contains(&"commission_rate"));
    }

    #[test]
    fn malformed_json_is_one_error() {
        let errors = parse_candidate("this is not json").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("invalid JSON"));
    }

    #[test]
    fn bad_identifier_pattern_rejected() {
        let mut payload = valid_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("invoice_id".into(), serde_json::json!("INVALID"));
        let errors = parse_candidate(&payload.to_string()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "invoice_id"));
    }

    #[test]
    fn bad_date_rejected() {
        let mut payload = valid_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("invoice_date".into(), serde_json::json!("January 15"));
        let errors = parse_candidate(&payload.to_string()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "invoice_date"));
    }

    #[test]
    fn unknown_currency_rejected() {
        let mut payload = valid_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("currency".into(), serde_json::json!("XYZ"));
        let errors = parse_candidate(&payload.to_string()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "currency"));
    }

    #[test]
    fn optional_fields_default_to_zero() {
        let mut payload = valid_payload();
        let map = payload.as_object_mut().unwrap();
        map.remove("tax_amount");
        map.insert("commission_amount".into(), serde_json::Value::Null);
        map.remove("commission_rate");
        let invoice = parse_candidate(&payload.to_string()).expect("should parse");
        assert_eq!(invoice.tax_amount, Decimal::ZERO);
        assert_eq!(invoice.commission_amount, Decimal::ZERO);
        assert_eq!(invoice.commission_rate, Decimal::ZERO);
    }

    #[test]
    fn numeric_money_values_accepted() {
        let mut payload = valid_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("subtotal".into(), serde_json::json!(1150.0));
        let invoice = parse_candidate(&payload.to_string()).expect("should parse");
        assert_eq!(invoice.subtotal, Decimal::new(115000, 2));
    }

    #[test]
    fn zero_quantity_rejected() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().insert(
            "line_items".into(),
            serde_json::json!([{"description": "x", "quantity": 0, "unit_price": "1.00"}]),
        );
        let errors = parse_candidate(&payload.to_string()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "line_items[0].quantity"));
    }

    #[test]
    fn missing_line_items_is_empty_list() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("line_items");
        let invoice = parse_candidate(&payload.to_string()).expect("should parse");
        assert!(invoice.line_items.is_empty());
    }

    #[test]
    fn too_many_decimal_places_rejected() {
        let mut payload = valid_payload();
        payload
            .as_object_mut()
            .unwrap()
            .insert("subtotal".into(), serde_json::json!("1150.005"));
        let errors = parse_candidate(&payload.to_string()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "subtotal"));
    }
}
