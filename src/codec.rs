//! Structured-to-text codec used to present payloads to a language model and to read
//! its answers back.
//!
//! [`encode`] renders pretty JSON with keys in descriptor order. [`decode`] tolerates the
//! usual wrapping around a model's answer (code fences, leading prose), then strictly
//! validates. `decode(encode(v)) == v` for every value valid under the descriptor, once
//! integral `number`s are written as integers.

use serde_json::Value;

use crate::agent::validate::validate;
use crate::agent::Payload;
use crate::error::{Error, Result};
use crate::schema::TypeDescriptor;

/// Render `value` as text.
pub fn encode(value: &Value, descriptor: &TypeDescriptor) -> String {
    format!("{:#}", descriptor.canonicalize(value))
}

/// Parse and validate text produced for `descriptor`.
pub fn decode(text: &str, descriptor: &TypeDescriptor) -> Result<Payload> {
    let body = extract_object(text)
        .ok_or_else(|| Error::validation("$", "no JSON object found in response"))?;
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::validation("$", format!("invalid JSON: {e}")))?;
    validate(descriptor, &value)?;
    match descriptor.canonicalize(&value) {
        Value::Object(map) => Ok(map),
        _ => Err(Error::validation("$", "expected object")),
    }
}

/// The span from the first `{` to the last `}`, after dropping code fences.
fn extract_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (start < end).then(|| &unfenced[start..=end])
}
