//! Operation bucket keys.
//!
//! A key is `<identifier>_<hash>`. Operations on the same entity with the
//! same document collapse into one bucket, and every operation targeting a
//! temporary identifier has a key starting with that identifier.
//!
//! Keys are written to the persisted log, so both halves must stay
//! bit-exact across releases.

use crate::operation::Operation;

/// Identifier half of the key when the variables carry none.
pub const MISSING_IDENTIFIER: &str = "undefined";

/// 32-bit signed rolling hash over the UTF-16 code units of `text`.
///
/// `hash = hash * 31 + unit`, wrapping on overflow.
#[must_use]
pub fn hash_code(text: &str) -> i32 {
    text.encode_utf16().fold(0_i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    })
}

/// Bucket key of `operation`.
#[must_use]
pub fn operation_key(operation: &Operation) -> String {
    let id = operation.identifier();
    format!(
        "{}_{}",
        id.as_deref().unwrap_or(MISSING_IDENTIFIER),
        hash_code(operation.query.as_str())
    )
}
