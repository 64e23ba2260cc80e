#![forbid(unsafe_code)]

//! Structural comparisons used by snapshot diffing and error detection.

use crate::value::Value;

/// One-level structural equality.
///
/// Two objects are equal when they have the same key set and each pair of
/// values is equal. Arrays compare slot by slot. Anything else falls back to
/// plain equality.
#[must_use]
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| b.get(key).is_some_and(|other| other == value))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.error() == b.error() && a.iter().eq(b.iter())
        }
        _ => a == b,
    }
}

/// Does this error tree contain at least one error?
///
/// Containers are searched recursively, including a whole-array error.
/// `Null` leaves are "no error"; every other leaf counts.
#[must_use]
pub fn has_any_error(errors: &Value) -> bool {
    match errors {
        Value::Null => false,
        Value::Object(map) => map.values().any(has_any_error),
        Value::Array(array) => {
            array.error().is_some_and(has_any_error) || array.iter().any(has_any_error)
        }
        _ => true,
    }
}
