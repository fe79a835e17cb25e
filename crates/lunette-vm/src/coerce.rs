//! Type coercion helpers for Lua 5.4 semantics.

use lunette_core::number::{self, float_to_integer};
use lunette_core::string::{StringId, StringInterner};
use lunette_core::value::Value;

/// Numeric view of a value: numbers as-is, numeric strings converted.
pub fn to_numeric(v: Value, strings: &StringInterner) -> Option<Value> {
    match v {
        Value::Integer(_) | Value::Float(_) => Some(v),
        Value::String(id) => number::str_to_number(strings.get_bytes(id)),
        _ => None,
    }
}

/// Try to convert a value to f64. Strings that look like numbers convert.
pub fn to_number(v: Value, strings: &StringInterner) -> Option<f64> {
    match to_numeric(v, strings)? {
        Value::Integer(i) => Some(i as f64),
        Value::Float(f) => Some(f),
        _ => None,
    }
}

/// Try to convert a value to i64 without losing information.
pub fn to_integer(v: Value, strings: &StringInterner) -> Option<i64> {
    match to_numeric(v, strings)? {
        Value::Integer(i) => Some(i),
        Value::Float(f) => float_to_integer(f),
        _ => None,
    }
}

/// True if arithmetic could use this operand without a metamethod.
pub fn is_arith_operand(v: Value, strings: &StringInterner) -> bool {
    to_numeric(v, strings).is_some()
}

/// String form of a value for concatenation; `None` for non-string,
/// non-number values.
pub fn to_string_for_concat(v: Value, strings: &mut StringInterner) -> Option<StringId> {
    match v {
        Value::String(id) => Some(id),
        Value::Integer(_) | Value::Float(_) => {
            let text = number::number_to_string(v)?;
            Some(strings.intern(text.as_bytes()))
        }
        _ => None,
    }
}
