//! Extraction prompts and the prompt-source seam.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing extraction behaviour (adding a
//!    field, tightening an instruction) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without spinning up a real provider, making prompt regressions easy
//!    to catch.
//!
//! The orchestrator never reads templates directly; it goes through
//! [`PromptSource`], a narrow injected trait, so deployments can serve
//! templates from a database or config service without the pipeline
//! knowing. [`BuiltinPrompts`] is the default, embedding one template per
//! vendor category with a `{schema}` placeholder.

use crate::error::ExtractError;
use crate::model::VendorCategory;

/// Where extraction prompt templates come from.
///
/// A missing template is a configuration error that fails the document —
/// extraction without instructions would produce garbage that the schema
/// layer then rejects at token cost.
pub trait PromptSource: Send + Sync {
    /// Return the template for a category, `{schema}` placeholder included.
    fn fetch_template(&self, category: VendorCategory) -> Result<String, ExtractError>;
}

/// The built-in template set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPrompts;

impl PromptSource for BuiltinPrompts {
    fn fetch_template(&self, category: VendorCategory) -> Result<String, ExtractError> {
        let template = match category {
            VendorCategory::UberEats => UBEREATS_TEMPLATE,
            VendorCategory::DoorDash => DOORDASH_TEMPLATE,
            VendorCategory::Ifood => IFOOD_TEMPLATE,
            VendorCategory::GrubHub | VendorCategory::Rappi | VendorCategory::Other => {
                GENERIC_TEMPLATE
            }
        };
        Ok(template.to_string())
    }
}

/// Substitute the record schema into a template.
///
/// Plain string replacement, not a templating engine: templates carry
/// exactly one placeholder and prompt text must never be interpreted.
pub fn build_extraction_prompt(template: &str, schema_json: &str) -> String {
    template.replace("{schema}", schema_json)
}

/// JSON Schema of the candidate record, embedded into every prompt so the
/// model knows the exact field names, types, and bounds expected.
pub fn extraction_schema_json() -> &'static str {
    EXTRACTION_SCHEMA
}

const EXTRACTION_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["invoice_id", "vendor_name", "invoice_date", "due_date", "subtotal", "total_amount"],
  "properties": {
    "invoice_id":        {"type": "string", "pattern": "^[A-Z]{2,4}-\\d{4}-\\d{4,8}$", "description": "Unique invoice identifier, e.g. UE-2026-001234"},
    "vendor_name":       {"type": "string", "maxLength": 200, "description": "Restaurant or vendor name"},
    "vendor_type":       {"type": "string", "enum": ["ubereats", "doordash", "grubhub", "ifood", "rappi", "other"]},
    "invoice_date":      {"type": "string", "format": "date", "description": "Issue date, YYYY-MM-DD"},
    "due_date":          {"type": "string", "format": "date", "description": "Payment due date, YYYY-MM-DD"},
    "currency":          {"type": "string", "enum": ["BRL", "USD", "EUR", "GBP", "CAD", "AUD"]},
    "line_items": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["description", "unit_price"],
        "properties": {
          "description": {"type": "string", "maxLength": 500},
          "quantity":    {"type": "integer", "minimum": 1, "default": 1},
          "unit_price":  {"type": "string", "description": "Decimal with 2 places, e.g. \"1250.00\""}
        }
      }
    },
    "subtotal":          {"type": "string", "description": "Sum of line items before tax and commission"},
    "tax_amount":        {"type": "string", "description": "Tax amount; \"0.00\" if no tax line is printed"},
    "commission_rate":   {"type": "string", "description": "Platform commission as a fraction, e.g. \"0.15\" for 15%"},
    "commission_amount": {"type": "string", "description": "Platform commission amount"},
    "total_amount":      {"type": "string", "description": "Final invoice total"}
  }
}"#;

const GENERIC_TEMPLATE: &str = r#"You are an expert invoice analyst. The attached image(s) are the pages of a single delivery-platform invoice. Extract its data as one JSON object.

Follow these rules precisely:

1. FIELDS
   - Extract every field defined in the schema below
   - Copy identifiers, names, and dates exactly as printed
   - Dates must be formatted as YYYY-MM-DD regardless of how they are printed
   - Monetary values are decimal strings with 2 places and no currency symbol

2. LINE ITEMS
   - One entry per printed line, in the order they appear
   - Do not invent lines for totals, subtotals, or taxes
   - If quantity is not printed, omit it

3. AMOUNTS
   - subtotal is the sum of the line items before tax and commission
   - commission_rate is a fraction (15% -> "0.15")
   - Never compute a value you cannot see; copy what the page states

4. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations

Schema:
{schema}"#;

const UBEREATS_TEMPLATE: &str = r#"You are an expert invoice analyst for Uber Eats restaurant payout statements. The attached image(s) are the pages of one statement. Extract its data as one JSON object.

Follow these rules precisely:

1. FIELDS
   - Extract every field defined in the schema below
   - The invoice identifier is printed near the top, format UE-YYYY-NNNNNN
   - Dates must be formatted as YYYY-MM-DD
   - Monetary values are decimal strings with 2 places and no currency symbol

2. LINE ITEMS
   - Typical lines: "Order Sales", "Delivery Fees Collected", "Promotions Adjustment", "Tips"
   - One entry per printed line, in order; do not invent lines for totals

3. AMOUNTS
   - "Marketplace Fee" or "Service Fee" percentages map to commission_rate as a fraction
   - The fee amount deducted maps to commission_amount
   - Never compute a value you cannot see; copy what the page states

4. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations

Schema:
{schema}"#;

const DOORDASH_TEMPLATE: &str = r#"You are an expert invoice analyst for DoorDash merchant payout statements. The attached image(s) are the pages of one statement. Extract its data as one JSON object.

Follow these rules precisely:

1. FIELDS
   - Extract every field defined in the schema below
   - The invoice identifier is printed in the header, format DD-YYYY-NNNNNN
   - Dates must be formatted as YYYY-MM-DD
   - Monetary values are decimal strings with 2 places and no currency symbol

2. LINE ITEMS
   - Typical lines: "Order Subtotal", "Tips", "Delivery Fees"
   - One entry per printed line, in order; do not invent lines for totals

3. AMOUNTS
   - The commission percentage in the fee breakdown maps to commission_rate as a fraction
   - Never compute a value you cannot see; copy what the page states

4. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations

Schema:
{schema}"#;

const IFOOD_TEMPLATE: &str = r#"You are an expert invoice analyst for iFood restaurant settlement invoices (Brazilian Portuguese). The attached image(s) are the pages of one invoice. Extract its data as one JSON object.

Follow these rules precisely:

1. FIELDS
   - Extract every field defined in the schema below
   - The invoice identifier is printed near the top, format IF-YYYY-NNNNNN
   - Dates may be printed DD/MM/YYYY; output them as YYYY-MM-DD
   - Monetary values use Brazilian formatting (1.234,56); output them as
     decimal strings with a dot separator and 2 places ("1234.56")

2. LINE ITEMS
   - Typical lines: "Vendas de Pedidos", "Taxa de Entrega Repassada"
   - Keep descriptions in the original language, in printed order

3. AMOUNTS
   - "Comissão" percentages map to commission_rate as a fraction
   - Never compute a value you cannot see; copy what the page states

4. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations

Schema:
{schema}"#;
