//! Payload cleanup: deterministic extraction of JSON from raw model output.
//!
//! ## Why is cleanup necessary?
//!
//! Even well-prompted models occasionally wrap their answer in artefacts
//! that are *semantically correct* from the model's perspective but break a
//! strict JSON parser:
//!
//! - ` ```json … ``` ` fences despite the prompt saying "output only JSON"
//! - A sentence of preamble ("Here is the extracted invoice:") before the
//!   object
//! - Trailing commentary after the closing brace
//!
//! This module applies cheap, deterministic rules to recover the candidate
//! object. Keeping them here rather than in the prompt means the prompt
//! stays focused on *what to extract*, not on formatting edge-cases, and
//! each rule is independently testable. Anything these rules cannot recover
//! is a schema-layer error — cleanup never invents or repairs JSON.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// Extract the JSON candidate from a raw provider response.
///
/// Rules (applied in order):
/// 1. If a fenced code block exists, take its contents (first block wins)
/// 2. Slice from the first `{` to the last `}` to drop surrounding prose
/// 3. Trim whitespace
///
/// If no object delimiters are present the trimmed input is returned as-is
/// and left for the schema layer to reject with a precise parse error.
pub fn extract_json_payload(raw: &str) -> String {
    let candidate = match RE_FENCED_BLOCK.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    };

    let sliced = match (candidate.find('{'), candidate.rfind('}')) {
        (Some(open), Some(close)) if close > open => candidate[open..=close].to_string(),
        _ => candidate,
    };

    sliced.trim().to_string()
}
