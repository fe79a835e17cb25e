//! Base library: the global functions.

use crate::{LibResult, PrintSink};
use lunette_core::number::str_to_number;
use lunette_core::value::Value;
use lunette_vm::binary_chunk::is_binary_chunk;
use lunette_vm::dispatch;
use lunette_vm::metamethod;
use lunette_vm::{CallbackResult, ExecutionContext, LuaError, Protection, TailCallRequest, Vm};

/// Maximum number of values `unpack` may produce.
const MAX_UNPACK: i64 = 1_000_000;

pub fn register(vm: &mut Vm, sink: PrintSink) {
    let globals = vm.globals;
    vm.set_global("_G", Value::Table(globals));
    let version = vm.options.version.to_string();
    let version = vm.intern(&version);
    vm.set_global("_VERSION", version);

    let print = vm.create_function("print", move |ctx, args| {
        let mut line = String::new();
        for (i, v) in args.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            let id = ctx.tostring(*v)?;
            line.push_str(&ctx.str(id));
        }
        sink(&line);
        Ok(CallbackResult::none())
    });
    vm.set_global("print", print);

    for (name, func) in [
        ("type", base_type as crate::LibFn),
        ("tostring", base_tostring),
        ("tonumber", base_tonumber),
        ("error", base_error),
        ("assert", base_assert),
        ("select", base_select),
        ("rawget", base_rawget),
        ("rawset", base_rawset),
        ("rawequal", base_rawequal),
        ("rawlen", base_rawlen),
        ("getmetatable", base_getmetatable),
        ("setmetatable", base_setmetatable),
        ("unpack", base_unpack),
        ("pcall", base_pcall),
        ("xpcall", base_xpcall),
        ("load", base_load),
        ("collectgarbage", base_collectgarbage),
    ] {
        let f = vm.create_function(name, func);
        vm.set_global(name, f);
    }

    // Iterator factories carry their step function as an upvalue.
    let next = vm.create_function("next", base_next);
    vm.set_global("next", next);
    let pairs = vm.register_callback("pairs", base_pairs);
    let pairs = vm.create_native(pairs, "pairs", vec![next]);
    vm.set_global("pairs", pairs);
    let ipairs_step = vm.create_function("ipairs_step", ipairs_step);
    let ipairs = vm.register_callback("ipairs", base_ipairs);
    let ipairs = vm.create_native(ipairs, "ipairs", vec![ipairs_step]);
    vm.set_global("ipairs", ipairs);
}

// ---- Types and conversions ----

fn base_type(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = ctx.check_any(&args, 0)?;
    Ok(CallbackResult::one(ctx.intern(v.type_name())))
}

fn base_tostring(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = ctx.check_any(&args, 0)?;
    let id = ctx.tostring(v)?;
    Ok(CallbackResult::one(Value::String(id)))
}

fn base_tonumber(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    if matches!(args.get(1), None | Some(Value::Nil)) {
        let v = ctx.check_any(&args, 0)?;
        let n = match v {
            Value::Integer(_) | Value::Float(_) => v,
            Value::String(id) => str_to_number(ctx.vm.strings.get_bytes(id)).unwrap_or_default(),
            _ => Value::Nil,
        };
        return Ok(CallbackResult::one(n));
    }
    let base = ctx.check_integer(&args, 1)?;
    let Value::String(id) = ExecutionContext::arg(&args, 0) else {
        return Err(ctx.type_error(&args, 0, "string"));
    };
    if !(2..=36).contains(&base) {
        return Err(ctx.arg_error(1, "base out of range"));
    }
    let text = ctx.str(id).into_owned();
    let n = parse_int_in_base(&text, base as u32).map_or(Value::Nil, Value::Integer);
    Ok(CallbackResult::one(n))
}

/// Integer digits in `base`, with optional surrounding whitespace and a
/// leading minus. Wraps on overflow like Lua does.
fn parse_int_in_base(text: &str, base: u32) -> Option<i64> {
    let text = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\x0b');
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(36).filter(|&d| d < base)?;
        n = n.wrapping_mul(i64::from(base)).wrapping_add(i64::from(d));
    }
    Some(if neg { n.wrapping_neg() } else { n })
}

// ---- Errors ----

fn base_error(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let value = ExecutionContext::arg(&args, 0);
    let level = ctx.opt_integer(&args, 1, 1)?;
    if let (Value::String(id), true) = (value, level > 0) {
        if let Some(prefix) = ctx.vm.where_prefix(level as usize) {
            let msg = format!("{prefix} {}", ctx.str(id));
            return Err(LuaError::runtime(msg, &mut ctx.vm.strings));
        }
    }
    Err(LuaError::from_value(value, &ctx.vm.strings))
}

fn base_assert(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = ctx.check_any(&args, 0)?;
    if v.is_truthy() {
        return Ok(args.into());
    }
    match args.get(1) {
        Some(&msg) => Err(LuaError::from_value(msg, &ctx.vm.strings)),
        None => Err(ctx.error("assertion failed!")),
    }
}

fn base_pcall(ctx: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> LibResult {
    let function = ctx.check_any(&args, 0)?;
    args.remove(0);
    Ok(CallbackResult::TailCall(TailCallRequest {
        function,
        args,
        protection: Some(Protection::Pcall),
    }))
}

fn base_xpcall(ctx: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> LibResult {
    let handler = ctx.check_any(&args, 1)?;
    let function = args[0];
    args.drain(..2);
    Ok(CallbackResult::TailCall(TailCallRequest {
        function,
        args,
        protection: Some(Protection::Xpcall { handler }),
    }))
}

// ---- Varargs ----

fn base_select(ctx: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> LibResult {
    let count = args.len().saturating_sub(1) as i64;
    if let Value::String(id) = ExecutionContext::arg(&args, 0) {
        if ctx.vm.strings.get_bytes(id) == b"#" {
            return Ok(CallbackResult::one(Value::Integer(count)));
        }
    }
    let n = ctx.check_integer(&args, 0)?;
    let start = if n < 0 {
        if count + n < 0 {
            return Err(ctx.arg_error(0, "index out of range"));
        }
        count + n + 1
    } else if n == 0 {
        return Err(ctx.arg_error(0, "index out of range"));
    } else {
        n.min(count + 1)
    };
    Ok(args.split_off(start as usize).into())
}

pub(crate) fn unpack_values(ctx: &mut ExecutionContext<'_>, args: &[Value]) -> Result<Vec<Value>, LuaError> {
    let t = ctx.check_table(args, 0)?;
    let i = ctx.opt_integer(args, 1, 1)?;
    let j = match args.get(2) {
        None | Some(Value::Nil) => ctx.vm.gc.get_table(t).length(),
        Some(_) => ctx.check_integer(args, 2)?,
    };
    if i > j {
        return Ok(Vec::new());
    }
    if j.checked_sub(i).map_or(true, |n| n >= MAX_UNPACK) {
        return Err(ctx.error("too many results to unpack"));
    }
    let table = ctx.vm.gc.get_table(t);
    Ok((i..=j).map(|k| table.raw_geti(k)).collect())
}

fn base_unpack(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    Ok(unpack_values(ctx, &args)?.into())
}

// ---- Raw access ----

fn base_rawget(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let key = ctx.check_any(&args, 1)?;
    Ok(CallbackResult::one(ctx.vm.gc.get_table(t).raw_get(key)))
}

fn base_rawset(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let key = ctx.check_any(&args, 1)?;
    let value = ctx.check_any(&args, 2)?;
    if let Err(e) = ctx.vm.gc.get_table_mut(t).raw_set(key, value) {
        return Err(ctx.error(e.message()));
    }
    Ok(CallbackResult::one(Value::Table(t)))
}

fn base_rawequal(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let a = ctx.check_any(&args, 0)?;
    let b = ctx.check_any(&args, 1)?;
    Ok(CallbackResult::one(Value::Boolean(a.raw_equals(&b))))
}

fn base_rawlen(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let len = match ExecutionContext::arg(&args, 0) {
        Value::Table(t) => ctx.vm.gc.get_table(t).length(),
        Value::String(id) => ctx.vm.strings.get_bytes(id).len() as i64,
        _ => return Err(ctx.arg_error(0, "table or string expected")),
    };
    Ok(CallbackResult::one(Value::Integer(len)))
}

// ---- Metatables ----

fn base_getmetatable(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = ctx.check_any(&args, 0)?;
    let vm = &ctx.vm;
    let Some(mt) = metamethod::get_metatable(v, &vm.gc, vm.string_metatable) else {
        return Ok(CallbackResult::one(Value::Nil));
    };
    let protected = vm.gc.get_table(mt).raw_get_str(vm.mm_names.metatable);
    if protected.is_nil() {
        Ok(CallbackResult::one(Value::Table(mt)))
    } else {
        Ok(CallbackResult::one(protected))
    }
}

fn base_setmetatable(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let mt = match ExecutionContext::arg(&args, 1) {
        Value::Nil => None,
        Value::Table(mt) => Some(mt),
        _ => return Err(ctx.type_error(&args, 1, "nil or table")),
    };
    if let Some(current) = ctx.vm.gc.get_table(t).metatable {
        if !ctx.vm.gc.get_table(current).raw_get_str(ctx.vm.mm_names.metatable).is_nil() {
            return Err(ctx.error("cannot change a protected metatable"));
        }
    }
    ctx.vm.gc.get_table_mut(t).metatable = mt;
    Ok(CallbackResult::one(Value::Table(t)))
}

// ---- Iteration ----

fn base_next(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let key = ExecutionContext::arg(&args, 1);
    match ctx.vm.gc.get_table(t).next(key) {
        Ok(Some((k, v))) => Ok(vec![k, v].into()),
        Ok(None) => Ok(CallbackResult::one(Value::Nil)),
        Err(_) => Err(ctx.error("invalid key to 'next'")),
    }
}

fn base_pairs(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = ctx.check_any(&args, 0)?;
    let handler = metamethod::get_metamethod(v, ctx.vm.mm_names.pairs, &ctx.vm.gc, None);
    if let Some(handler) = handler {
        let mut results = ctx.call(handler, &[v])?;
        results.resize(3, Value::Nil);
        return Ok(results.into());
    }
    let t = ctx.check_table(&args, 0)?;
    Ok(vec![ctx.upvalue(0), Value::Table(t), Value::Nil].into())
}

fn base_ipairs(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = ctx.check_any(&args, 0)?;
    Ok(vec![ctx.upvalue(0), v, Value::Integer(0)].into())
}

fn ipairs_step(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let i = ctx.check_integer(&args, 1)?.wrapping_add(1);
    let obj = ExecutionContext::arg(&args, 0);
    let v = match obj {
        Value::Table(t) if ctx.vm.gc.get_table(t).metatable.is_none() => {
            ctx.vm.gc.get_table(t).raw_geti(i)
        }
        _ => dispatch::index_value(ctx.vm, obj, Value::Integer(i), None)?,
    };
    if v.is_nil() {
        Ok(CallbackResult::one(Value::Nil))
    } else {
        Ok(vec![Value::Integer(i), v].into())
    }
}

// ---- Chunks and the collector ----

fn base_load(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let chunk = ExecutionContext::arg(&args, 0);
    let bytes = match chunk {
        Value::String(id) => ctx.vm.strings.get_bytes(id).to_vec(),
        f if f.is_function() => {
            let mut buf = Vec::new();
            loop {
                let piece = ctx.call(f, &[])?;
                match piece.first().copied().unwrap_or_default() {
                    Value::Nil => break,
                    Value::String(id) => {
                        let bytes = ctx.vm.strings.get_bytes(id);
                        if bytes.is_empty() {
                            break;
                        }
                        buf.extend_from_slice(bytes);
                    }
                    _ => {
                        let msg = ctx.intern("reader function must return a string");
                        return Ok(vec![Value::Nil, msg].into());
                    }
                }
            }
            buf
        }
        _ => return Err(ctx.type_error(&args, 0, "string")),
    };
    let chunk_name = match ExecutionContext::arg(&args, 1) {
        Value::Nil => match chunk {
            Value::String(_) => String::from_utf8_lossy(&bytes).into_owned(),
            _ => "=(load)".to_string(),
        },
        _ => {
            let id = ctx.check_string(&args, 1)?;
            ctx.str(id).into_owned()
        }
    };
    let mode = match ExecutionContext::arg(&args, 2) {
        Value::Nil => "bt".to_string(),
        _ => {
            let id = ctx.check_string(&args, 2)?;
            ctx.str(id).into_owned()
        }
    };
    let binary = is_binary_chunk(&bytes);
    let refused = match (binary, mode.contains('b'), mode.contains('t')) {
        (true, false, _) => Some("binary"),
        (false, _, false) => Some("text"),
        _ => None,
    };
    if let Some(kind) = refused {
        let msg = ctx.intern(&format!("attempt to load a {kind} chunk (mode is '{mode}')"));
        return Ok(vec![Value::Nil, msg].into());
    }

    match ctx.vm.compile_chunk(&bytes, &chunk_name) {
        Ok(proto) => {
            let env = (args.len() >= 4).then(|| args[3]);
            Ok(CallbackResult::one(ctx.vm.load_proto(proto, env)))
        }
        Err(e) => {
            tracing::debug!(chunk = %chunk_name, error = %e, "load failed");
            let msg = e.to_value(&mut ctx.vm.strings);
            Ok(vec![Value::Nil, msg].into())
        }
    }
}

fn base_collectgarbage(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let option = match ExecutionContext::arg(&args, 0) {
        Value::Nil => "collect".to_string(),
        _ => {
            let id = ctx.check_string(&args, 0)?;
            ctx.str(id).into_owned()
        }
    };
    match option.as_str() {
        "collect" => {
            ctx.vm.collect_garbage();
            Ok(CallbackResult::one(Value::Integer(0)))
        }
        "step" => {
            ctx.vm.collect_garbage();
            Ok(CallbackResult::one(Value::Boolean(true)))
        }
        "count" => Ok(CallbackResult::one(Value::Float(ctx.vm.memory_kb()))),
        "isrunning" => Ok(CallbackResult::one(Value::Boolean(true))),
        _ => Err(ctx.arg_error(0, format!("invalid option '{option}'"))),
    }
}
