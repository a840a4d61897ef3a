//! Response decoding: raw model text → [`RefinedFields`].
//!
//! JSON mode is requested on every call, but some providers still wrap the
//! object in a ```` ```json ```` fence or prefix a BOM. Those wrappers are
//! removed; everything else is strict. The payload must be a single JSON
//! object with exactly the five record fields and the right types. A
//! partial record is never produced.

use crate::output::RefinedFields;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as _;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n?```$").unwrap());

/// Strip an outer code fence and invisible leading/trailing characters.
pub fn clean_response(raw: &str) -> &str {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || c == '\u{FEFF}' || c == '\u{200B}');
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str().trim()),
        None => trimmed,
    }
}

/// Decode a model response into the five record fields.
pub fn decode_fields(raw: &str) -> Result<RefinedFields, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(clean_response(raw))?;
    if !value.is_object() {
        return Err(serde_json::Error::custom(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    serde_json::from_value(value)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
