//! Comparison operations with Lua 5.4 semantics.

use lunette_core::string::StringInterner;
use lunette_core::value::Value;
use std::cmp::Ordering;

/// Result of a comparison that may need a metamethod.
#[derive(Debug, PartialEq, Eq)]
pub enum CompareResult {
    Ok(bool),
    NeedMetamethod,
}

/// Primitive equality. Returns `(equal, may_use_eq_metamethod)`: the second
/// flag is set for two distinct tables or two distinct userdata.
pub fn lua_eq(a: Value, b: Value) -> (bool, bool) {
    if a.raw_equals(&b) {
        return (true, false);
    }
    let candidates = matches!(
        (a, b),
        (Value::Table(_), Value::Table(_)) | (Value::UserData(_), Value::UserData(_))
    );
    (false, candidates)
}

/// Exact integer/float ordering, correct beyond 2^53.
fn int_float_cmp(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f >= 9.223372036854775808e18 {
        return Some(Ordering::Less);
    }
    if f < -9.223372036854775808e18 {
        return Some(Ordering::Greater);
    }
    let fl = f.floor();
    match i.cmp(&(fl as i64)) {
        Ordering::Equal if f > fl => Some(Ordering::Less),
        ord => Some(ord),
    }
}

fn number_cmp(a: Value, b: Value) -> Option<Option<Ordering>> {
    Some(match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(&y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(&y),
        (Value::Integer(x), Value::Float(y)) => int_float_cmp(x, y),
        (Value::Float(x), Value::Integer(y)) => int_float_cmp(y, x).map(Ordering::reverse),
        _ => return None,
    })
}

fn compare(a: Value, b: Value, strings: &StringInterner, accept: fn(Ordering) -> bool) -> CompareResult {
    if let Some(ord) = number_cmp(a, b) {
        return CompareResult::Ok(ord.is_some_and(accept));
    }
    if let (Value::String(sa), Value::String(sb)) = (a, b) {
        return CompareResult::Ok(accept(strings.get_bytes(sa).cmp(strings.get_bytes(sb))));
    }
    CompareResult::NeedMetamethod
}

/// Lua less-than comparison.
pub fn lua_lt(a: Value, b: Value, strings: &StringInterner) -> CompareResult {
    compare(a, b, strings, |o| o == Ordering::Less)
}

/// Lua less-than-or-equal comparison.
pub fn lua_le(a: Value, b: Value, strings: &StringInterner) -> CompareResult {
    compare(a, b, strings, |o| o != Ordering::Greater)
}
