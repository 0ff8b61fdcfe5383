//! Entity identifier extraction.

use serde_json::{Map, Value};

/// Candidate identifier fields, in priority order.
pub const IDENTIFIER_FIELDS: [&str; 4] = ["id", "_id", "Id", "ID"];

/// Default prefix of client-generated placeholder identifiers.
pub const DEFAULT_TEMP_ID_PREFIX: &str = "temp_";

/// Return the first usable identifier of `data`.
///
/// Returns `None` when `data` is not an object or none of
/// [`IDENTIFIER_FIELDS`] holds a usable scalar.
#[must_use]
pub fn identify(data: &Value) -> Option<String> {
    data.as_object().and_then(identify_map)
}

/// Same as [`identify`] for an already-destructured object.
#[must_use]
pub fn identify_map(data: &Map<String, Value>) -> Option<String> {
    IDENTIFIER_FIELDS
        .iter()
        .find_map(|field| data.get(*field).and_then(scalar_id))
}

/// Render a scalar as an identifier.
///
/// Empty strings, zero, `false`, `null` and nested values are not
/// identifiers.
pub(crate) fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

/// Returns `true` if `id` is a placeholder awaiting server confirmation.
#[must_use]
pub fn is_temporary(id: &str, prefix: &str) -> bool {
    !prefix.is_empty() && id.starts_with(prefix)
}
