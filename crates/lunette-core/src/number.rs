//! Numeric conversions shared by the lexer, the VM and the libraries:
//! Lua numeral parsing, `%.14g` float formatting and float/integer casts.
use crate::value::Value;

/// Exact float to integer conversion. Fails for non-integral or out-of-range values.
pub fn float_to_integer(f: f64) -> Option<i64> {
    // -2^63 is exact; 2^63 is the first value out of range.
    if f.fract() != 0.0 || !(-9.223372036854775808e18..9.223372036854775808e18).contains(&f) {
        return None;
    }
    Some(f as i64)
}

/// Floor a float into an integer if it fits (used by `for` limits and `math.floor`).
pub fn float_floor_to_integer(f: f64) -> Option<i64> {
    float_to_integer(f.floor())
}

fn is_lua_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Convert a string to a number following Lua's `tonumber` rules:
/// surrounding whitespace is allowed, hex integers wrap around, decimal
/// integers that overflow become floats.
pub fn str_to_number(bytes: &[u8]) -> Option<Value> {
    let start = bytes.iter().position(|&b| !is_lua_space(b))?;
    let end = bytes.iter().rposition(|&b| !is_lua_space(b))? + 1;
    let s = &bytes[start..end];

    let (neg, body) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if body.is_empty() {
        return None;
    }

    if body.len() > 2 && body[0] == b'0' && (body[1] == b'x' || body[1] == b'X') {
        let v = parse_hex(&body[2..])?;
        return Some(match v {
            Value::Integer(i) if neg => Value::Integer(i.wrapping_neg()),
            Value::Float(f) if neg => Value::Float(-f),
            other => other,
        });
    }

    let v = parse_decimal(body)?;
    Some(match v {
        Value::Integer(i) if neg => Value::Integer(i.wrapping_neg()),
        Value::Float(f) if neg => Value::Float(-f),
        other => other,
    })
}

/// Parse the digits of a hex numeral (without the `0x` prefix).
pub fn parse_hex(s: &[u8]) -> Option<Value> {
    let mut int_val: i64 = 0;
    let mut mantissa: f64 = 0.0;
    let mut exp: i64 = 0;
    let mut any_digit = false;
    let mut seen_dot = false;
    let mut is_float = false;
    let mut i = 0;

    while i < s.len() {
        let c = s[i];
        if c == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
            is_float = true;
        } else if let Some(d) = (c as char).to_digit(16) {
            any_digit = true;
            int_val = int_val.wrapping_mul(16).wrapping_add(d as i64);
            mantissa = mantissa * 16.0 + d as f64;
            if seen_dot {
                exp -= 4;
            }
        } else {
            break;
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }

    if i < s.len() && (s[i] == b'p' || s[i] == b'P') {
        is_float = true;
        i += 1;
        let mut exp_neg = false;
        if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
            exp_neg = s[i] == b'-';
            i += 1;
        }
        let digits_start = i;
        let mut e: i64 = 0;
        while i < s.len() && s[i].is_ascii_digit() {
            e = e.saturating_mul(10).saturating_add((s[i] - b'0') as i64);
            i += 1;
        }
        if i == digits_start {
            return None;
        }
        exp += if exp_neg { -e } else { e };
    }
    if i != s.len() {
        return None;
    }

    if is_float {
        let exp = exp.clamp(-2200, 2200) as i32;
        Some(Value::Float(mantissa * 2f64.powi(exp)))
    } else {
        Some(Value::Integer(int_val))
    }
}

/// Parse an unsigned decimal numeral.
pub fn parse_decimal(s: &[u8]) -> Option<Value> {
    let mut i = 0;
    let mut digits = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    let mut is_float = false;
    if i < s.len() && s[i] == b'.' {
        is_float = true;
        i += 1;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        is_float = true;
        i += 1;
        if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    if i != s.len() {
        return None;
    }

    let text = std::str::from_utf8(s).ok()?;
    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return Some(Value::Integer(n));
        }
    }
    text.parse::<f64>().ok().map(Value::Float)
}

/// Format a float the way Lua's `%.14g` does, keeping a `.0` suffix on
/// integral values so floats stay distinguishable from integers.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let s = format_g(f, 14);
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        format!("{s}.0")
    } else {
        s
    }
}

/// C-style `%.<precision>g` for finite values.
pub fn format_g(f: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{:.*e}", precision - 1, f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= precision as i32 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{f:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Render a number value the way `tostring` does.
pub fn number_to_string(v: Value) -> Option<String> {
    match v {
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(format_float(f)),
        _ => None,
    }
}
