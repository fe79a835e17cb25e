//! String library subset and the shared string metatable.

use crate::{register_lib, set_field, LibResult};
use lunette_core::value::Value;
use lunette_vm::{CallbackResult, ExecutionContext, Vm};

/// Upper bound on strings built by `rep`.
const MAX_STRING_SIZE: usize = i32::MAX as usize;

/// Register the `string` table and make it the `__index` of every string.
pub fn register(vm: &mut Vm) {
    let lib = register_lib(
        vm,
        "string",
        &[
            ("len", str_len),
            ("sub", str_sub),
            ("upper", str_upper),
            ("lower", str_lower),
            ("rep", str_rep),
            ("reverse", str_reverse),
            ("byte", str_byte),
            ("char", str_char),
        ],
    );
    let meta = vm.gc.alloc_table(0, 1);
    set_field(vm, meta, "__index", Value::Table(lib));
    vm.string_metatable = Some(meta);
}

/// Start index: negative counts from the end, clamped to 1.
fn start_pos(pos: i64, len: usize) -> usize {
    let len = len as i64;
    if pos > 0 {
        pos as usize
    } else if pos == 0 || pos < -len {
        1
    } else {
        (len + pos + 1) as usize
    }
}

/// End index: negative counts from the end, clamped to `len`.
fn end_pos(pos: i64, len: usize) -> usize {
    let ilen = len as i64;
    if pos > ilen {
        len
    } else if pos >= 0 {
        pos as usize
    } else if pos < -ilen {
        0
    } else {
        (ilen + pos + 1) as usize
    }
}

fn bytes_arg(ctx: &mut ExecutionContext<'_>, args: &[Value], index: usize) -> Result<Vec<u8>, lunette_vm::LuaError> {
    let id = ctx.check_string(args, index)?;
    Ok(ctx.vm.strings.get_bytes(id).to_vec())
}

fn string_result(ctx: &mut ExecutionContext<'_>, bytes: &[u8]) -> LibResult {
    let id = ctx.vm.strings.intern(bytes);
    Ok(CallbackResult::one(Value::String(id)))
}

fn str_len(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let id = ctx.check_string(&args, 0)?;
    let len = ctx.vm.strings.get_bytes(id).len();
    Ok(CallbackResult::one(Value::Integer(len as i64)))
}

fn str_sub(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let s = bytes_arg(ctx, &args, 0)?;
    let i = start_pos(ctx.opt_integer(&args, 1, 1)?, s.len());
    let j = end_pos(ctx.opt_integer(&args, 2, -1)?, s.len());
    if i > j {
        return string_result(ctx, b"");
    }
    string_result(ctx, &s[i - 1..j])
}

fn str_upper(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let s = bytes_arg(ctx, &args, 0)?;
    string_result(ctx, &s.to_ascii_uppercase())
}

fn str_lower(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let s = bytes_arg(ctx, &args, 0)?;
    string_result(ctx, &s.to_ascii_lowercase())
}

fn str_rep(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let s = bytes_arg(ctx, &args, 0)?;
    let n = ctx.check_integer(&args, 1)?;
    let sep = match args.get(2) {
        None | Some(Value::Nil) => Vec::new(),
        Some(_) => bytes_arg(ctx, &args, 2)?,
    };
    if n <= 0 {
        return string_result(ctx, b"");
    }
    let n = n as usize;
    let total = (s.len() + sep.len())
        .checked_mul(n)
        .filter(|&t| t < MAX_STRING_SIZE);
    let Some(total) = total else {
        return Err(ctx.error("resulting string too large"));
    };
    let mut out = Vec::with_capacity(total);
    for k in 0..n {
        if k > 0 {
            out.extend_from_slice(&sep);
        }
        out.extend_from_slice(&s);
    }
    string_result(ctx, &out)
}

fn str_reverse(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let mut s = bytes_arg(ctx, &args, 0)?;
    s.reverse();
    string_result(ctx, &s)
}

fn str_byte(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let s = bytes_arg(ctx, &args, 0)?;
    let first = ctx.opt_integer(&args, 1, 1)?;
    let i = start_pos(first, s.len());
    let j = end_pos(ctx.opt_integer(&args, 2, first)?, s.len());
    if i > j {
        return Ok(CallbackResult::none());
    }
    Ok(s[i - 1..j]
        .iter()
        .map(|&b| Value::Integer(i64::from(b)))
        .collect::<Vec<_>>()
        .into())
}

fn str_char(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let mut out = Vec::with_capacity(args.len());
    for i in 0..args.len() {
        let c = ctx.check_integer(&args, i)?;
        match u8::try_from(c) {
            Ok(b) => out.push(b),
            Err(_) => return Err(ctx.arg_error(i, "value out of range")),
        }
    }
    string_result(ctx, &out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{run, run_err, run_strings};

    #[test]
    fn test_sub_positions() {
        assert_eq!(
            run_strings("local s = 'hello' return s:sub(2, 3), s:sub(-3), s:sub(0), s:sub(4, 2), s:sub(-100, 2)"),
            vec!["el", "llo", "hello", "", "he"]
        );
    }

    #[test]
    fn test_method_calls_through_metatable() {
        assert_eq!(run_strings("return ('abc'):upper(), ('ABC'):lower(), ('abc'):reverse()"), vec!["ABC", "abc", "cba"]);
        assert_eq!(run("return ('abc'):len(), #'abc'"), vec![Value::Integer(3), Value::Integer(3)]);
    }

    #[test]
    fn test_rep() {
        assert_eq!(run_strings("return string.rep('ab', 3, ','), string.rep('x', 0)"), vec!["ab,ab,ab", ""]);
        assert!(run_err("return string.rep('x', 1 << 40)").contains("resulting string too large"));
    }

    #[test]
    fn test_byte_and_char() {
        assert_eq!(
            run("return string.byte('ABC', 1, -1)"),
            vec![Value::Integer(65), Value::Integer(66), Value::Integer(67)]
        );
        assert_eq!(run_strings("return string.char(72, 105)"), vec!["Hi"]);
        assert!(run_err("return string.char(256)").contains("bad argument #1 to 'char' (value out of range)"));
    }

    #[test]
    fn test_numbers_are_accepted_as_strings() {
        assert_eq!(run("return string.len(1234)"), vec![Value::Integer(4)]);
    }

    #[test]
    fn test_position_helpers() {
        assert_eq!(start_pos(-2, 5), 4);
        assert_eq!(end_pos(10, 5), 5);
        assert_eq!(end_pos(-6, 5), 0);
    }
}
