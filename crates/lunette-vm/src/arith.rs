//! Arithmetic operations with Lua 5.4 semantics.

use crate::coerce;
use lunette_compiler::opcode::OpCode;
use lunette_core::string::StringInterner;
use lunette_core::value::Value;

/// Result of an arithmetic operation that may need a metamethod fallback.
#[derive(Debug, PartialEq)]
pub enum ArithResult {
    Ok(Value),
    /// Type mismatch: the caller should try a metamethod.
    NeedMetamethod,
    /// A genuine fault (integer division by zero, float without an integer
    /// representation). The message is undecorated.
    Error(&'static str),
}

/// Arithmetic operation enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

impl ArithOp {
    pub fn from_opcode(op: OpCode) -> Option<ArithOp> {
        Some(match op {
            OpCode::Add => ArithOp::Add,
            OpCode::Sub => ArithOp::Sub,
            OpCode::Mul => ArithOp::Mul,
            OpCode::Div => ArithOp::Div,
            OpCode::FloorDiv => ArithOp::IDiv,
            OpCode::Mod => ArithOp::Mod,
            OpCode::Power => ArithOp::Pow,
            OpCode::BitAnd => ArithOp::BAnd,
            OpCode::BitOr => ArithOp::BOr,
            OpCode::BitXor => ArithOp::BXor,
            OpCode::ShiftLeft => ArithOp::Shl,
            OpCode::ShiftRight => ArithOp::Shr,
            _ => return None,
        })
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr
        )
    }
}

const NO_INTEGER_REP: &str = "number has no integer representation";

/// Perform a binary arithmetic or bitwise operation.
pub fn arith_op(op: ArithOp, a: Value, b: Value, strings: &StringInterner) -> ArithResult {
    if op.is_bitwise() {
        return bitwise_op(op, a, b, strings);
    }
    // Fast path: both integers (Div and Pow always produce a float)
    if let (Value::Integer(ia), Value::Integer(ib)) = (a, b) {
        if !matches!(op, ArithOp::Div | ArithOp::Pow) {
            return int_arith(op, ia, ib);
        }
    }
    let (Some(na), Some(nb)) = (
        coerce::to_numeric(a, strings),
        coerce::to_numeric(b, strings),
    ) else {
        return ArithResult::NeedMetamethod;
    };
    match (na, nb) {
        (Value::Integer(ia), Value::Integer(ib)) if !matches!(op, ArithOp::Div | ArithOp::Pow) => {
            int_arith(op, ia, ib)
        }
        _ => {
            let fa = coerce::to_number(na, strings).unwrap_or(f64::NAN);
            let fb = coerce::to_number(nb, strings).unwrap_or(f64::NAN);
            ArithResult::Ok(Value::Float(float_arith(op, fa, fb)))
        }
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> ArithResult {
    let result = match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::IDiv => {
            if b == 0 {
                return ArithResult::Error("attempt to perform 'n//0'");
            }
            lua_idiv(a, b)
        }
        ArithOp::Mod => {
            if b == 0 {
                return ArithResult::Error("attempt to perform 'n%%0'");
            }
            lua_imod(a, b)
        }
        ArithOp::BAnd => a & b,
        ArithOp::BOr => a | b,
        ArithOp::BXor => a ^ b,
        ArithOp::Shl => lua_shl(a, b),
        ArithOp::Shr => lua_shr(a, b),
        ArithOp::Div => return ArithResult::Ok(Value::Float(a as f64 / b as f64)),
        ArithOp::Pow => return ArithResult::Ok(Value::Float((a as f64).powf(b as f64))),
    };
    ArithResult::Ok(Value::Integer(result))
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => a.powf(b),
        // Float floor division and modulo by zero follow IEEE 754.
        ArithOp::IDiv => (a / b).floor(),
        ArithOp::Mod => lua_fmod(a, b),
        ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr => f64::NAN,
    }
}

/// Lua integer division (floor division).
pub fn lua_idiv(a: i64, b: i64) -> i64 {
    // i64::MIN / -1 wraps to i64::MIN
    let d = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        d - 1
    } else {
        d
    }
}

/// Lua integer modulo.
pub fn lua_imod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        r.wrapping_add(b)
    } else {
        r
    }
}

/// Lua float modulo: `a - floor(a/b)*b`, computed without the rounding
/// error of that formula.
pub fn lua_fmod(a: f64, b: f64) -> f64 {
    if b.is_infinite() && a.is_finite() {
        return if (a >= 0.0) == (b > 0.0) { a } else { b };
    }
    let r = a % b;
    if r != 0.0 && ((r > 0.0) != (b > 0.0)) {
        r + b
    } else {
        r
    }
}

fn lua_shl(a: i64, b: i64) -> i64 {
    if b <= -64 || b >= 64 {
        0
    } else if b < 0 {
        lua_shr(a, -b)
    } else {
        (a as u64).wrapping_shl(b as u32) as i64
    }
}

/// Logical (unsigned) right shift.
fn lua_shr(a: i64, b: i64) -> i64 {
    if b <= -64 || b >= 64 {
        0
    } else if b < 0 {
        lua_shl(a, -b)
    } else {
        (a as u64).wrapping_shr(b as u32) as i64
    }
}

fn bitwise_op(op: ArithOp, a: Value, b: Value, strings: &StringInterner) -> ArithResult {
    let na = coerce::to_numeric(a, strings);
    let nb = coerce::to_numeric(b, strings);
    let (Some(na), Some(nb)) = (na, nb) else {
        return ArithResult::NeedMetamethod;
    };
    let (Some(ia), Some(ib)) = (
        coerce::to_integer(na, strings),
        coerce::to_integer(nb, strings),
    ) else {
        return ArithResult::Error(NO_INTEGER_REP);
    };
    int_arith(op, ia, ib)
}

/// Unary minus.
pub fn arith_unm(v: Value, strings: &StringInterner) -> ArithResult {
    match coerce::to_numeric(v, strings) {
        Some(Value::Integer(i)) => ArithResult::Ok(Value::Integer(i.wrapping_neg())),
        Some(Value::Float(f)) => ArithResult::Ok(Value::Float(-f)),
        _ => ArithResult::NeedMetamethod,
    }
}

/// Bitwise NOT.
pub fn arith_bnot(v: Value, strings: &StringInterner) -> ArithResult {
    match coerce::to_numeric(v, strings) {
        Some(n) => match coerce::to_integer(n, strings) {
            Some(i) => ArithResult::Ok(Value::Integer(!i)),
            None => ArithResult::Error(NO_INTEGER_REP),
        },
        None => ArithResult::NeedMetamethod,
    }
}
