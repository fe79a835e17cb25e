//! Main bytecode dispatch loop.
//!
//! Frames live on `vm.call_stack`; their locals and operand stacks share
//! `vm.stack`. A Lua-to-Lua call pushes a frame and keeps looping, so deep
//! Lua recursion never grows the Rust stack. Host functions, metamethods and
//! `__close` handlers re-enter through [`call_function`], which counts
//! against `max_native_depth`.

use crate::arith::{self, ArithOp, ArithResult};
use crate::callback::{CallbackResult, ExecutionContext};
use crate::callinfo::{CallInfo, PendingCall, Protection};
use crate::coerce;
use crate::compare::{self, CompareResult};
use crate::error::LuaError;
use crate::metamethod;
use crate::vm::Vm;
use lunette_compiler::opcode::{decode_count, Instruction, OpCode, SymbolName};
use lunette_compiler::proto::Constant;
use lunette_core::gc::{GcIdx, NativeFunction};
use lunette_core::number::float_floor_to_integer;
use lunette_core::string::StringId;
use lunette_core::table::Table;
use lunette_core::value::Value;
use std::rc::Rc;

/// Bound on `__index`/`__newindex` chains.
const MAX_TAG_LOOP: usize = 2000;
/// Bound on nested `__call` handlers for one call.
const MAX_CALL_CHAIN: usize = 100;
/// Largest size hint `NewTable` preallocates.
const MAX_TABLE_HINT: usize = 1 << 16;

/// Why the dispatch loop stopped.
#[derive(Debug)]
pub enum Exit {
    /// The frame at the entry depth returned.
    Return(Vec<Value>),
    /// The running coroutine yielded.
    Yield(Vec<Value>),
}

/// Outcome of setting up a call.
pub(crate) enum Precall {
    /// A Lua frame was pushed; the loop continues in it.
    Lua,
    /// A host function finished with these results.
    Native(Vec<Value>),
    /// A host function asked to yield. Carries the protected-call layers
    /// still waiting for the results.
    Yield(Vec<Value>, Vec<Protection>),
}

// ---- Entry points ----

/// Run until the frame at `base_depth` returns, catching errors at
/// protected frames along the way.
pub fn execute_from(vm: &mut Vm, base_depth: usize) -> Result<Exit, LuaError> {
    loop {
        match run(vm, base_depth) {
            Ok(exit) => return Ok(exit),
            Err(err) => {
                if let Some(exit) = catch_error(vm, base_depth, err)? {
                    return Ok(exit);
                }
            }
        }
    }
}

/// Call a function from Rust and collect all of its results.
pub fn call_function(vm: &mut Vm, func: Value, args: &[Value]) -> Result<Vec<Value>, LuaError> {
    if vm.native_depth >= vm.options.max_native_depth {
        return Err(vm.runtime_error("C stack overflow"));
    }
    vm.native_depth += 1;
    let depth = vm.call_stack.len();
    let func_pos = vm.stack.len();
    vm.stack.push(func);
    vm.stack.extend_from_slice(args);

    let result = match precall(vm, func_pos, args.len(), -1, Vec::new(), None) {
        Ok(Precall::Lua) => match execute_from(vm, depth) {
            Ok(Exit::Return(values)) => Ok(values),
            Ok(Exit::Yield(_)) => Err(LuaError::Internal("yield escaped a host call".into())),
            Err(e) => Err(e),
        },
        Ok(Precall::Native(values)) => Ok(values),
        Ok(Precall::Yield(..)) => Err(vm.yield_error()),
        Err(e) => Err(e),
    };
    vm.native_depth -= 1;

    match result {
        Ok(values) => {
            vm.stack.truncate(func_pos);
            Ok(values)
        }
        Err(err) => {
            let err = err.with_traceback(vm.traceback());
            if vm.native_depth == 0 {
                notify_debugger(vm, &err);
            }
            Err(unwind_with_error(vm, depth, func_pos, err))
        }
    }
}

/// Start the body of a fresh coroutine placed at `func_pos`.
pub(crate) fn start_call(
    vm: &mut Vm,
    func_pos: usize,
    nargs: usize,
    base_depth: usize,
) -> Result<Exit, LuaError> {
    match precall(vm, func_pos, nargs, -1, Vec::new(), None)? {
        Precall::Lua => execute_from(vm, base_depth),
        Precall::Native(values) => {
            vm.stack.truncate(func_pos);
            Ok(Exit::Return(values))
        }
        Precall::Yield(values, protections) => {
            vm.pending_yield = Some(PendingCall {
                func_pos,
                num_results: -1,
                protections,
            });
            Ok(Exit::Yield(values))
        }
    }
}

fn notify_debugger(vm: &mut Vm, err: &LuaError) {
    if let Some(mut svc) = vm.debug.take() {
        svc.on_error(vm, err);
        if vm.debug.is_none() {
            vm.debug = Some(svc);
        }
    }
}

// ---- Result plumbing ----

/// Prefix `true` once per protected-call layer a successful call ran under.
pub(crate) fn wrap_success(protections: &[Protection], values: Vec<Value>) -> Vec<Value> {
    if protections.is_empty() {
        return values;
    }
    let mut out = Vec::with_capacity(protections.len() + values.len());
    out.extend(protections.iter().map(|_| Value::Boolean(true)));
    out.extend(values);
    out
}

/// Replace the callee and its arguments at `func_pos` with call results,
/// adjusted to `num_results` (`-1`: all of them followed by their count).
pub(crate) fn deliver(vm: &mut Vm, func_pos: usize, num_results: i32, mut values: Vec<Value>) {
    vm.stack.truncate(func_pos);
    if num_results < 0 {
        let n = values.len();
        vm.stack.extend(values);
        vm.stack.push(Value::Integer(n as i64));
    } else {
        values.resize(num_results as usize, Value::Nil);
        vm.stack.extend(values);
    }
}

/// Hand a finished frame's results to its caller, or out of the loop when
/// the frame was the entry frame.
fn finish_frame(vm: &mut Vm, ci: &CallInfo, values: Vec<Value>, base_depth: usize) -> Option<Exit> {
    let values = wrap_success(&ci.protections, values);
    complete(vm, ci.func_pos, ci.num_results, values, base_depth)
}

fn complete(
    vm: &mut Vm,
    func_pos: usize,
    num_results: i32,
    values: Vec<Value>,
    base_depth: usize,
) -> Option<Exit> {
    if vm.call_stack.len() <= base_depth {
        vm.stack.truncate(func_pos);
        Some(Exit::Return(values))
    } else {
        deliver(vm, func_pos, num_results, values);
        None
    }
}

fn return_from_frame(vm: &mut Vm, values: Vec<Value>, base_depth: usize) -> Result<Option<Exit>, LuaError> {
    let idx = vm.call_stack.len() - 1;
    if let Some(e) = close_tbc(vm, idx, 0, None) {
        return Err(e);
    }
    let Some(ci) = vm.call_stack.pop() else {
        return Err(LuaError::Internal("return without a frame".into()));
    };
    vm.close_upvalues(ci.base);
    Ok(finish_frame(vm, &ci, values, base_depth))
}

/// Park the running coroutine at a yield, or fail if it cannot yield here.
/// Returns `None` when the failure was caught by the call's own protection.
fn yield_from(
    vm: &mut Vm,
    func_pos: usize,
    num_results: i32,
    protections: Vec<Protection>,
    values: Vec<Value>,
    base_depth: usize,
) -> Result<Option<Exit>, LuaError> {
    if vm.is_yieldable() {
        vm.pending_yield = Some(PendingCall {
            func_pos,
            num_results,
            protections,
        });
        return Ok(Some(Exit::Yield(values)));
    }
    let err = vm.yield_error();
    match caught(vm, func_pos, protections, err)? {
        Precall::Native(values) => Ok(complete(vm, func_pos, num_results, values, base_depth)),
        _ => Err(LuaError::Internal("unexpected call state".into())),
    }
}

// ---- Errors and unwinding ----

/// The error value a protected call reports, after the `xpcall` handler
/// has seen it.
fn protected_error_value(vm: &mut Vm, protection: Protection, err: LuaError) -> Value {
    let value = err.to_value(&mut vm.strings);
    match protection {
        Protection::Pcall => value,
        Protection::Xpcall { handler } => match call_function(vm, handler, &[value]) {
            Ok(results) => results.first().copied().unwrap_or_default(),
            Err(e) => e.to_value(&mut vm.strings),
        },
    }
}

/// Turn an error raised while setting up a protected call into its
/// `(false, err)` results.
fn caught(
    vm: &mut Vm,
    func_pos: usize,
    mut protections: Vec<Protection>,
    err: LuaError,
) -> Result<Precall, LuaError> {
    vm.stack.truncate(func_pos);
    if !err.is_catchable() {
        return Err(err);
    }
    let Some(inner) = protections.pop() else {
        return Err(err);
    };
    tracing::debug!(error = %err, "protected call caught error");
    let value = protected_error_value(vm, inner, err);
    Ok(Precall::Native(wrap_success(
        &protections,
        vec![Value::Boolean(false), value],
    )))
}

/// Find the innermost protected frame at or above `base_depth`, unwind to
/// it and deliver `(false, err)`.
fn catch_error(vm: &mut Vm, base_depth: usize, err: LuaError) -> Result<Option<Exit>, LuaError> {
    if !err.is_catchable() {
        return Err(err);
    }
    let Some(idx) = (base_depth..vm.call_stack.len())
        .rev()
        .find(|&i| vm.call_stack[i].is_protected())
    else {
        return Err(err);
    };
    let mut protections = vm.call_stack[idx].protections.clone();
    let Some(inner) = protections.pop() else {
        return Err(err);
    };
    tracing::debug!(depth = idx, error = %err, "protected call caught error");

    let value = protected_error_value(vm, inner, err);
    let (func_pos, num_results) = {
        let ci = &vm.call_stack[idx];
        (ci.func_pos, ci.num_results)
    };
    let err = LuaError::from_value(value, &vm.strings);
    let value = match close_frames(vm, idx, Some(err)) {
        Some(e) => e.to_value(&mut vm.strings),
        None => value,
    };
    vm.close_upvalues(func_pos);
    vm.call_stack.truncate(idx);

    let values = wrap_success(&protections, vec![Value::Boolean(false), value]);
    Ok(complete(vm, func_pos, num_results, values, base_depth))
}

/// Run the `__close` handlers of frame `frame` for slots at or above
/// `level`, innermost first. `err` is the error being propagated, if any;
/// a failing handler replaces it. Returns the error left standing.
fn close_tbc(vm: &mut Vm, frame: usize, level: usize, mut err: Option<LuaError>) -> Option<LuaError> {
    if vm.call_stack[frame].tbc_slots.last().map_or(true, |&s| s < level) {
        return err;
    }
    vm.gc_pause += 1;
    while let Some(&slot) = vm.call_stack[frame].tbc_slots.last() {
        if slot < level {
            break;
        }
        vm.call_stack[frame].tbc_slots.pop();
        let v = vm.stack.get(slot).copied().unwrap_or_default();
        let Some(mm) = metamethod::get_metamethod(v, vm.mm_names.close, &vm.gc, vm.string_metatable)
        else {
            continue;
        };
        let errv = match &err {
            Some(e) => e.to_value(&mut vm.strings),
            None => Value::Nil,
        };
        if let Err(e) = call_function(vm, mm, &[v, errv]) {
            err = Some(e);
        }
    }
    vm.gc_pause -= 1;
    err
}

/// Close the pending to-be-closed variables of every frame from the top
/// down to `depth`.
pub(crate) fn close_frames(vm: &mut Vm, depth: usize, mut err: Option<LuaError>) -> Option<LuaError> {
    for frame in (depth..vm.call_stack.len()).rev() {
        err = close_tbc(vm, frame, 0, err);
    }
    err
}

/// Unwind frames above `depth` after an uncaught error. Returns the error
/// to report (a failing `__close` may have replaced it).
pub(crate) fn unwind_with_error(vm: &mut Vm, depth: usize, stack_base: usize, err: LuaError) -> LuaError {
    let err = close_frames(vm, depth, Some(err.clone())).unwrap_or(err);
    vm.close_upvalues(stack_base);
    vm.call_stack.truncate(depth);
    vm.stack.truncate(stack_base);
    err
}

fn describe(vm: &Vm, symbol: Option<SymbolName>) -> String {
    match symbol {
        Some(sym) => format!(
            " ({} '{}')",
            sym.kind.describe(),
            vm.strings.get_str(sym.name)
        ),
        None => String::new(),
    }
}

/// `attempt to {action} a {type} value ({kind} '{name}')`.
fn type_error(vm: &mut Vm, action: &str, v: Value, symbol: Option<SymbolName>) -> LuaError {
    let msg = format!(
        "attempt to {action} a {} value{}",
        vm.obj_type_name(v),
        describe(vm, symbol)
    );
    vm.runtime_error(msg)
}

fn compare_error(vm: &mut Vm, a: Value, b: Value) -> LuaError {
    let ta = vm.obj_type_name(a);
    let tb = vm.obj_type_name(b);
    if ta == tb {
        vm.runtime_error(format!("attempt to compare two {ta} values"))
    } else {
        vm.runtime_error(format!("attempt to compare {ta} with {tb}"))
    }
}

// ---- Calls ----

fn call_native(
    vm: &mut Vm,
    idx: GcIdx<NativeFunction>,
    args: Vec<Value>,
) -> Result<CallbackResult, LuaError> {
    let cb = vm.gc.get_native(idx).callback;
    let Some(func) = vm.callbacks.get(cb.0 as usize).map(|c| Rc::clone(&c.func)) else {
        return Err(LuaError::Internal(format!("unknown callback {}", cb.0)));
    };
    vm.gc_pause += 1;
    let result = {
        let mut ctx = ExecutionContext::new(vm, idx);
        func(&mut ctx, args)
    };
    vm.gc_pause -= 1;
    result
}

/// Set up a call to the value at `func_pos` with `nargs` arguments above it.
/// Lua callees get a frame; host functions run to completion here (looping
/// over their tail-call requests). Errors raised here under `protections`
/// become `(false, err)` results.
pub(crate) fn precall(
    vm: &mut Vm,
    func_pos: usize,
    mut nargs: usize,
    num_results: i32,
    mut protections: Vec<Protection>,
    mut symbol: Option<SymbolName>,
) -> Result<Precall, LuaError> {
    let mut chain = 0;
    // The value first called, reported when a `__call` handler is itself
    // not callable.
    let mut callee = None;
    loop {
        match vm.stack[func_pos] {
            Value::Function(closure) => {
                if vm.call_stack.len() >= vm.options.max_call_depth {
                    return caught(vm, func_pos, protections, LuaError::StackOverflow);
                }
                push_lua_frame(vm, closure, func_pos, nargs, num_results, protections);
                return Ok(Precall::Lua);
            }
            Value::Native(idx) => {
                let args = vm.stack[func_pos + 1..func_pos + 1 + nargs].to_vec();
                let result = call_native(vm, idx, args);
                vm.stack.truncate(func_pos);
                match result {
                    Ok(CallbackResult::Values(values)) => {
                        return Ok(Precall::Native(wrap_success(&protections, values)));
                    }
                    Ok(CallbackResult::Yield(values)) => return Ok(Precall::Yield(values, protections)),
                    Ok(CallbackResult::TailCall(req)) => {
                        vm.stack.push(req.function);
                        nargs = req.args.len();
                        vm.stack.extend(req.args);
                        protections.extend(req.protection);
                        symbol = None;
                        chain = 0;
                        callee = None;
                    }
                    Err(e) => return caught(vm, func_pos, protections, e),
                }
            }
            other => {
                let handler =
                    metamethod::get_metamethod(other, vm.mm_names.call, &vm.gc, vm.string_metatable);
                let original = *callee.get_or_insert(other);
                let Some(handler) = handler else {
                    let err = type_error(vm, "call", original, symbol);
                    return caught(vm, func_pos, protections, err);
                };
                chain += 1;
                if chain > MAX_CALL_CHAIN {
                    let err = vm.runtime_error("loop in call");
                    return caught(vm, func_pos, protections, err);
                }
                vm.stack.insert(func_pos, handler);
                nargs += 1;
            }
        }
    }
}

fn push_lua_frame(
    vm: &mut Vm,
    closure: GcIdx<lunette_core::gc::LuaClosure>,
    func_pos: usize,
    nargs: usize,
    num_results: i32,
    protections: Vec<Protection>,
) {
    let proto_idx = vm.gc.get_closure(closure).proto_idx;
    let (nparams, max_slots, is_vararg) = {
        let p = &vm.protos[proto_idx].proto;
        (
            p.num_params as usize,
            (p.max_slots as usize).max(p.num_params as usize),
            p.is_vararg,
        )
    };
    let nfixed = nargs.min(nparams);
    let mut ci = if is_vararg {
        let base = func_pos + 1 + nargs;
        vm.stack.truncate(base);
        vm.stack.resize(base + max_slots, Value::Nil);
        vm.stack.copy_within(func_pos + 1..func_pos + 1 + nfixed, base);
        let mut ci = CallInfo::new(closure, proto_idx, func_pos, base);
        ci.varargs_start = func_pos + 1 + nfixed;
        ci.num_varargs = nargs - nfixed;
        ci
    } else {
        let base = func_pos + 1;
        vm.stack.truncate(base + nfixed);
        vm.stack.resize(base + max_slots, Value::Nil);
        CallInfo::new(closure, proto_idx, func_pos, base)
    };
    ci.num_results = num_results;
    ci.protections = protections;
    vm.call_stack.push(ci);
}

// ---- Garbage collection safe point ----

fn gc_check(vm: &mut Vm) {
    if vm.gc_pause == 0
        && vm.gc.allocated_since_sweep() + vm.strings.allocated_since_sweep() >= vm.gc_threshold
    {
        vm.collect_garbage();
    }
}

// ---- Indexing ----

/// `obj[key]` with `__index` handling.
pub fn index_value(
    vm: &mut Vm,
    obj: Value,
    key: Value,
    symbol: Option<SymbolName>,
) -> Result<Value, LuaError> {
    let mut cur = obj;
    for depth in 0..MAX_TAG_LOOP {
        let handler = if let Value::Table(t) = cur {
            let v = vm.gc.get_table(t).raw_get(key);
            if !v.is_nil() {
                return Ok(v);
            }
            match metamethod::get_metamethod(cur, vm.mm_names.index, &vm.gc, None) {
                Some(h) => h,
                None => return Ok(Value::Nil),
            }
        } else {
            match metamethod::get_metamethod(cur, vm.mm_names.index, &vm.gc, vm.string_metatable) {
                Some(h) => h,
                None => {
                    let symbol = if depth == 0 { symbol } else { None };
                    return Err(type_error(vm, "index", cur, symbol));
                }
            }
        };
        if handler.is_function() {
            let results = call_function(vm, handler, &[cur, key])?;
            return Ok(results.first().copied().unwrap_or_default());
        }
        cur = handler;
    }
    Err(vm.runtime_error("'__index' chain too long; possible loop"))
}

fn raw_set_checked(vm: &mut Vm, t: GcIdx<Table>, key: Value, value: Value) -> Result<(), LuaError> {
    let result = vm.gc.get_table_mut(t).raw_set(key, value);
    result.map_err(|e| vm.runtime_error(e.message()))
}

/// `obj[key] = value` with `__newindex` handling.
pub fn set_index(
    vm: &mut Vm,
    obj: Value,
    key: Value,
    value: Value,
    symbol: Option<SymbolName>,
) -> Result<(), LuaError> {
    let mut cur = obj;
    for depth in 0..MAX_TAG_LOOP {
        let handler = if let Value::Table(t) = cur {
            if !vm.gc.get_table(t).raw_get(key).is_nil() {
                return raw_set_checked(vm, t, key, value);
            }
            match metamethod::get_metamethod(cur, vm.mm_names.newindex, &vm.gc, None) {
                Some(h) => h,
                None => return raw_set_checked(vm, t, key, value),
            }
        } else {
            match metamethod::get_metamethod(cur, vm.mm_names.newindex, &vm.gc, vm.string_metatable) {
                Some(h) => h,
                None => {
                    let symbol = if depth == 0 { symbol } else { None };
                    return Err(type_error(vm, "index", cur, symbol));
                }
            }
        };
        if handler.is_function() {
            call_function(vm, handler, &[cur, key, value])?;
            return Ok(());
        }
        cur = handler;
    }
    Err(vm.runtime_error("'__newindex' chain too long; possible loop"))
}

// ---- Operators ----

fn first(values: Vec<Value>) -> Value {
    values.first().copied().unwrap_or_default()
}

/// Try `event` on `a`, then on `b`.
fn binary_metamethod(vm: &mut Vm, event: StringId, a: Value, b: Value) -> Result<Option<Value>, LuaError> {
    let mm = metamethod::get_metamethod(a, event, &vm.gc, vm.string_metatable)
        .or_else(|| metamethod::get_metamethod(b, event, &vm.gc, vm.string_metatable));
    match mm {
        Some(f) => Ok(Some(first(call_function(vm, f, &[a, b])?))),
        None => Ok(None),
    }
}

fn arith(vm: &mut Vm, op: ArithOp, a: Value, b: Value, inst: &Instruction) -> Result<Value, LuaError> {
    match arith::arith_op(op, a, b, &vm.strings) {
        ArithResult::Ok(v) => Ok(v),
        ArithResult::Error(msg) => Err(vm.runtime_error(msg)),
        ArithResult::NeedMetamethod => {
            let event = vm.mm_names.for_arith(op);
            if let Some(v) = binary_metamethod(vm, event, a, b)? {
                return Ok(v);
            }
            let (side, bad) = if coerce::is_arith_operand(a, &vm.strings) {
                (2, b)
            } else {
                (1, a)
            };
            let symbol = inst.symbol.filter(|_| inst.num_val == side);
            let action = if op.is_bitwise() {
                "perform bitwise operation on"
            } else {
                "perform arithmetic on"
            };
            Err(type_error(vm, action, bad, symbol))
        }
    }
}

fn concat(vm: &mut Vm, a: Value, b: Value, inst: &Instruction) -> Result<Value, LuaError> {
    let sa = coerce::to_string_for_concat(a, &mut vm.strings);
    let sb = coerce::to_string_for_concat(b, &mut vm.strings);
    if let (Some(sa), Some(sb)) = (sa, sb) {
        let mut bytes = vm.strings.get_bytes(sa).to_vec();
        bytes.extend_from_slice(vm.strings.get_bytes(sb));
        return Ok(Value::String(vm.strings.intern(&bytes)));
    }
    if let Some(v) = binary_metamethod(vm, vm.mm_names.concat, a, b)? {
        return Ok(v);
    }
    let (side, bad) = if sa.is_some() { (2, b) } else { (1, a) };
    let symbol = inst.symbol.filter(|_| inst.num_val == side);
    Err(type_error(vm, "concatenate", bad, symbol))
}

fn unary_metamethod(vm: &mut Vm, event: StringId, v: Value) -> Result<Option<Value>, LuaError> {
    match metamethod::get_metamethod(v, event, &vm.gc, vm.string_metatable) {
        Some(f) => Ok(Some(first(call_function(vm, f, &[v, v])?))),
        None => Ok(None),
    }
}

fn unary(vm: &mut Vm, op: OpCode, v: Value, inst: &Instruction) -> Result<Value, LuaError> {
    let symbol = inst.symbol.filter(|_| inst.num_val == 1);
    match op {
        OpCode::Neg => match arith::arith_unm(v, &vm.strings) {
            ArithResult::Ok(r) => Ok(r),
            ArithResult::Error(msg) => Err(vm.runtime_error(msg)),
            ArithResult::NeedMetamethod => match unary_metamethod(vm, vm.mm_names.unm, v)? {
                Some(r) => Ok(r),
                None => Err(type_error(vm, "perform arithmetic on", v, symbol)),
            },
        },
        OpCode::BitNot => match arith::arith_bnot(v, &vm.strings) {
            ArithResult::Ok(r) => Ok(r),
            ArithResult::Error(msg) => Err(vm.runtime_error(msg)),
            ArithResult::NeedMetamethod => match unary_metamethod(vm, vm.mm_names.bnot, v)? {
                Some(r) => Ok(r),
                None => Err(type_error(vm, "perform bitwise operation on", v, symbol)),
            },
        },
        _ => {
            if let Value::String(id) = v {
                return Ok(Value::Integer(vm.strings.get_bytes(id).len() as i64));
            }
            if let Some(r) = unary_metamethod(vm, vm.mm_names.len, v)? {
                return Ok(r);
            }
            match v {
                Value::Table(t) => Ok(Value::Integer(vm.gc.get_table(t).length())),
                _ => Err(type_error(vm, "get length of", v, symbol)),
            }
        }
    }
}

/// `a == b` with `__eq`.
pub fn values_equal(vm: &mut Vm, a: Value, b: Value) -> Result<bool, LuaError> {
    let (eq, candidates) = compare::lua_eq(a, b);
    if eq || !candidates {
        return Ok(eq);
    }
    Ok(binary_metamethod(vm, vm.mm_names.eq, a, b)?.is_some_and(|v| v.is_truthy()))
}

/// `a < b` (or `a <= b`) with `__lt`/`__le`.
pub fn less_than(vm: &mut Vm, a: Value, b: Value, or_equal: bool) -> Result<bool, LuaError> {
    let result = if or_equal {
        compare::lua_le(a, b, &vm.strings)
    } else {
        compare::lua_lt(a, b, &vm.strings)
    };
    match result {
        CompareResult::Ok(r) => Ok(r),
        CompareResult::NeedMetamethod => {
            let event = if or_equal { vm.mm_names.le } else { vm.mm_names.lt };
            match binary_metamethod(vm, event, a, b)? {
                Some(v) => Ok(v.is_truthy()),
                None => Err(compare_error(vm, a, b)),
            }
        }
    }
}

// ---- Numeric for ----

/// Integer loop limit clipped to the integer range; `None` when the loop
/// must not run at all.
fn for_limit(vm: &mut Vm, limit: Value, init: i64, step: i64) -> Result<Option<i64>, LuaError> {
    let limit = match limit {
        Value::Integer(l) => l,
        Value::Float(f) => {
            let clipped = if step < 0 { f.ceil() } else { f.floor() };
            match float_floor_to_integer(clipped) {
                Some(l) => l,
                None if f.is_nan() => return Ok(None),
                None if f > 0.0 => {
                    if step < 0 {
                        return Ok(None);
                    }
                    i64::MAX
                }
                None => {
                    if step > 0 {
                        return Ok(None);
                    }
                    i64::MIN
                }
            }
        }
        _ => return Err(vm.runtime_error("'for' limit must be a number")),
    };
    let skip = if step > 0 { init > limit } else { init < limit };
    Ok((!skip).then_some(limit))
}

fn for_number(vm: &mut Vm, v: Value, what: &str) -> Result<f64, LuaError> {
    match v {
        Value::Integer(i) => Ok(i as f64),
        Value::Float(f) => Ok(f),
        _ => Err(vm.runtime_error(format!("'for' {what} must be a number"))),
    }
}

/// Set up loop state at slot `s`. Returns false if the body never runs.
/// The caller checks that `s + 3` is on the stack.
///
/// Integer loops keep `s` = index, `s+1` = remaining iterations (as u64
/// bits), `s+2` = step. Float loops keep `s` = index, `s+1` = limit,
/// `s+2` = step. The visible variable is `s+3`.
fn for_prep(vm: &mut Vm, s: usize, init: Value, limit: Value, step: Value) -> Result<bool, LuaError> {
    if let (Value::Integer(i), Value::Integer(st)) = (init, step) {
        if st == 0 {
            return Err(vm.runtime_error("'for' step is zero"));
        }
        let Some(l) = for_limit(vm, limit, i, st)? else {
            return Ok(false);
        };
        let count = if st > 0 {
            (l as u64).wrapping_sub(i as u64) / st as u64
        } else {
            (i as u64).wrapping_sub(l as u64) / ((-(st + 1)) as u64 + 1)
        };
        vm.stack[s] = Value::Integer(i);
        vm.stack[s + 1] = Value::Integer(count as i64);
        vm.stack[s + 2] = Value::Integer(st);
        vm.stack[s + 3] = Value::Integer(i);
        return Ok(true);
    }
    let fl = for_number(vm, limit, "limit")?;
    let fs = for_number(vm, step, "step")?;
    let fi = for_number(vm, init, "initial value")?;
    if fs == 0.0 {
        return Err(vm.runtime_error("'for' step is zero"));
    }
    let skip = if fs > 0.0 { fl < fi } else { fi < fl };
    if skip {
        return Ok(false);
    }
    vm.stack[s] = Value::Float(fi);
    vm.stack[s + 1] = Value::Float(fl);
    vm.stack[s + 2] = Value::Float(fs);
    vm.stack[s + 3] = Value::Float(fi);
    Ok(true)
}

/// Advance the loop at slot `s`. Returns true while it continues. The
/// caller checks that `s + 3` is on the stack.
fn for_loop(vm: &mut Vm, s: usize) -> bool {
    match (vm.stack[s], vm.stack[s + 1], vm.stack[s + 2]) {
        (Value::Integer(i), Value::Integer(count), Value::Integer(step)) => {
            let count = count as u64;
            if count == 0 {
                return false;
            }
            let next = i.wrapping_add(step);
            vm.stack[s] = Value::Integer(next);
            vm.stack[s + 1] = Value::Integer((count - 1) as i64);
            vm.stack[s + 3] = Value::Integer(next);
            true
        }
        (Value::Float(i), Value::Float(limit), Value::Float(step)) => {
            let next = i + step;
            let continues = if step > 0.0 { next <= limit } else { limit <= next };
            if continues {
                vm.stack[s] = Value::Float(next);
                vm.stack[s + 3] = Value::Float(next);
            }
            continues
        }
        _ => false,
    }
}

// ---- The loop ----

fn constant_value(k: Constant) -> Value {
    match k {
        Constant::Nil => Value::Nil,
        Constant::Boolean(b) => Value::Boolean(b),
        Constant::Integer(i) => Value::Integer(i),
        Constant::Float(f) => Value::Float(f),
        Constant::String(id) => Value::String(id),
    }
}

/// Pop the top operand, never reaching below the running frame's base.
/// Nothing left to pop reads as nil.
#[inline]
fn pop(vm: &mut Vm) -> Value {
    let floor = vm.call_stack.last().map_or(0, |ci| ci.base);
    if vm.stack.len() > floor {
        vm.stack.pop().unwrap_or_default()
    } else {
        Value::Nil
    }
}

/// Resolve a count operand, popping the pushed count of an open one.
fn pop_count(vm: &mut Vm, operand: i32) -> usize {
    match decode_count(operand) {
        Ok(n) => n,
        Err(fixed) => match pop(vm) {
            Value::Integer(n) => fixed.saturating_add(n.max(0) as usize),
            _ => fixed,
        },
    }
}

// ---- Checked stack access ----
//
// Compiled code keeps every operand inside its frame. Undumped chunks are
// only checked instruction by instruction, so a crafted one can still ask
// for a slot the stack no longer holds; that becomes a runtime error.

fn malformed(vm: &mut Vm) -> LuaError {
    vm.runtime_error("malformed bytecode (stack access out of range)")
}

/// Position `depth` entries below the top, not below the frame's `floor`.
fn top_index(vm: &mut Vm, floor: usize, depth: usize) -> Result<usize, LuaError> {
    match vm.stack.len().checked_sub(depth.saturating_add(1)) {
        Some(i) if i >= floor => Ok(i),
        _ => Err(malformed(vm)),
    }
}

/// Stack position of local `slot`, which must still be on the stack.
fn slot_index(vm: &mut Vm, base: usize, slot: usize) -> Result<usize, LuaError> {
    let i = base.saturating_add(slot);
    if i < vm.stack.len() {
        Ok(i)
    } else {
        Err(malformed(vm))
    }
}

/// Split off the top `n` values of the frame.
fn take_top(vm: &mut Vm, floor: usize, n: usize) -> Result<Vec<Value>, LuaError> {
    match vm.stack.len().checked_sub(n) {
        Some(start) if start >= floor => Ok(vm.stack.split_off(start)),
        _ => Err(malformed(vm)),
    }
}

fn debug_hook(vm: &mut Vm) {
    if let Some(mut svc) = vm.debug.take() {
        svc.on_instruction(vm);
        if vm.debug.is_none() {
            vm.debug = Some(svc);
        }
    }
}

/// Execute instructions until the frame at `base_depth` returns or the
/// coroutine yields. Errors are returned to `execute_from`.
fn run(vm: &mut Vm, base_depth: usize) -> Result<Exit, LuaError> {
    loop {
        if vm.debug.is_some() {
            debug_hook(vm);
        }
        let ci_idx = vm.call_stack.len() - 1;
        let (proto_idx, pc, base) = {
            let ci = &vm.call_stack[ci_idx];
            (ci.proto_idx, ci.pc, ci.base)
        };
        let Some(&inst) = vm.protos[proto_idx].proto.code.get(pc) else {
            if let Some(exit) = return_from_frame(vm, Vec::new(), base_depth)? {
                return Ok(exit);
            }
            continue;
        };
        vm.call_stack[ci_idx].pc = pc + 1;

        match inst.op {
            OpCode::Nop => {}
            OpCode::Pop => {
                let len = vm.stack.len().saturating_sub(inst.num_val as usize);
                vm.stack.truncate(len.max(base));
            }
            OpCode::Copy => {
                let i = top_index(vm, base, inst.num_val as usize)?;
                let v = vm.stack[i];
                vm.stack.push(v);
            }
            OpCode::Swap => {
                let below = top_index(vm, base, 1)?;
                vm.stack.swap(below, below + 1);
            }
            OpCode::Literal => vm.stack.push(constant_value(inst.value)),
            OpCode::Closure => {
                gc_check(vm);
                let Some(&child) = vm.protos[proto_idx].children.get(inst.num_val as usize) else {
                    return Err(LuaError::Internal(format!("no child proto {}", inst.num_val)));
                };
                let descs: Vec<(bool, u16)> = vm.protos[child]
                    .proto
                    .upvalues
                    .iter()
                    .map(|u| (u.in_stack, u.index))
                    .collect();
                let parent = vm.call_stack[ci_idx].closure;
                let mut upvals = Vec::with_capacity(descs.len());
                for (in_stack, index) in descs {
                    let uv = if in_stack {
                        let slot = slot_index(vm, base, index as usize)?;
                        vm.find_or_create_upval(slot)
                    } else {
                        match vm.gc.get_closure(parent).upvalues.get(index as usize) {
                            Some(&uv) => uv,
                            None => return Err(malformed(vm)),
                        }
                    };
                    upvals.push(uv);
                }
                let closure = vm.gc.alloc_closure(child, upvals);
                vm.stack.push(Value::Function(closure));
            }
            OpCode::NewTable => {
                gc_check(vm);
                let narr = (inst.num_val.max(0) as usize).min(MAX_TABLE_HINT);
                let nhash = (inst.num_val2.max(0) as usize).min(MAX_TABLE_HINT);
                let t = vm.gc.alloc_table(narr, nhash);
                vm.stack.push(Value::Table(t));
            }
            OpCode::TblInitN => {
                let v = pop(vm);
                let k = pop(vm);
                let i = top_index(vm, base, inst.num_val as usize)?;
                if let Value::Table(t) = vm.stack[i] {
                    raw_set_checked(vm, t, k, v)?;
                }
            }
            OpCode::TblInitI => {
                let count = pop_count(vm, inst.num_val2);
                let values = take_top(vm, base, count)?;
                if let Some(&Value::Table(t)) = vm.stack.last() {
                    let table = vm.gc.get_table_mut(t);
                    for (i, v) in values.into_iter().enumerate() {
                        table.raw_seti(i64::from(inst.num_val) + i as i64, v);
                    }
                }
            }
            OpCode::Local => {
                let i = slot_index(vm, base, inst.num_val as usize)?;
                let v = vm.stack[i];
                vm.stack.push(v);
            }
            OpCode::StoreLcl => {
                let v = pop(vm);
                let i = slot_index(vm, base, inst.num_val as usize)?;
                vm.stack[i] = v;
            }
            OpCode::UpValue => {
                let closure = vm.call_stack[ci_idx].closure;
                let Some(&uv) = vm.gc.get_closure(closure).upvalues.get(inst.num_val as usize) else {
                    return Err(malformed(vm));
                };
                let v = vm.get_upval_value(uv);
                vm.stack.push(v);
            }
            OpCode::StoreUpv => {
                let v = pop(vm);
                let closure = vm.call_stack[ci_idx].closure;
                let Some(&uv) = vm.gc.get_closure(closure).upvalues.get(inst.num_val as usize) else {
                    return Err(malformed(vm));
                };
                vm.set_upval_value(uv, v);
            }
            OpCode::Env => vm.stack.push(Value::Table(vm.globals)),
            OpCode::Index => {
                let k = pop(vm);
                let o = pop(vm);
                let v = index_value(vm, o, k, inst.symbol)?;
                vm.stack.push(v);
            }
            OpCode::IndexN => {
                let o = pop(vm);
                let v = index_value(vm, o, constant_value(inst.value), inst.symbol)?;
                vm.stack.push(v);
            }
            OpCode::IndexSet => {
                let v = pop(vm);
                let oi = top_index(vm, base, inst.num_val as usize + 1)?;
                let (o, k) = (vm.stack[oi], vm.stack[oi + 1]);
                set_index(vm, o, k, v, inst.symbol)?;
            }
            OpCode::IndexSetN => {
                let v = pop(vm);
                let oi = top_index(vm, base, inst.num_val as usize)?;
                let o = vm.stack[oi];
                set_index(vm, o, constant_value(inst.value), v, inst.symbol)?;
            }
            OpCode::Method => {
                let o = pop(vm);
                let f = index_value(vm, o, constant_value(inst.value), inst.symbol)?;
                vm.stack.push(f);
                vm.stack.push(o);
            }
            OpCode::Call | OpCode::ThisCall => {
                gc_check(vm);
                let argc = pop_count(vm, inst.num_val);
                let func_pos = top_index(vm, base, argc)?;
                match precall(vm, func_pos, argc, inst.num_val2, Vec::new(), inst.symbol)? {
                    Precall::Lua => {}
                    Precall::Native(values) => deliver(vm, func_pos, inst.num_val2, values),
                    Precall::Yield(values, protections) => {
                        if let Some(exit) =
                            yield_from(vm, func_pos, inst.num_val2, protections, values, base_depth)?
                        {
                            return Ok(exit);
                        }
                    }
                }
            }
            OpCode::TailCall => {
                gc_check(vm);
                let argc = pop_count(vm, inst.num_val);
                let callee_pos = top_index(vm, base, argc)?;
                let callee = vm.stack[callee_pos];
                if !callee.is_function()
                    && metamethod::get_metamethod(callee, vm.mm_names.call, &vm.gc, vm.string_metatable)
                        .is_none()
                {
                    // Raise while the calling frame still exists.
                    return Err(type_error(vm, "call", callee, inst.symbol));
                }
                if let Some(e) = close_tbc(vm, ci_idx, 0, None) {
                    return Err(e);
                }
                let Some(ci) = vm.call_stack.pop() else {
                    return Err(LuaError::Internal("tail call without a frame".into()));
                };
                vm.close_upvalues(ci.base);
                vm.stack.copy_within(callee_pos.., ci.func_pos);
                vm.stack.truncate(ci.func_pos + 1 + argc);
                match precall(vm, ci.func_pos, argc, ci.num_results, ci.protections, inst.symbol)? {
                    Precall::Lua => {
                        if let Some(top) = vm.call_stack.last_mut() {
                            top.is_tail_call = true;
                        }
                    }
                    Precall::Native(values) => {
                        if let Some(exit) = complete(vm, ci.func_pos, ci.num_results, values, base_depth) {
                            return Ok(exit);
                        }
                    }
                    Precall::Yield(values, protections) => {
                        if let Some(exit) =
                            yield_from(vm, ci.func_pos, ci.num_results, protections, values, base_depth)?
                        {
                            return Ok(exit);
                        }
                    }
                }
            }
            OpCode::Ret => {
                let n = pop_count(vm, inst.num_val);
                let values = take_top(vm, base, n)?;
                if let Some(exit) = return_from_frame(vm, values, base_depth)? {
                    return Ok(exit);
                }
            }
            OpCode::Jump => vm.call_stack[ci_idx].pc = inst.num_val as usize,
            OpCode::Jf => {
                if pop(vm).is_falsy() {
                    vm.call_stack[ci_idx].pc = inst.num_val as usize;
                }
            }
            OpCode::JNil => {
                if pop(vm).is_nil() {
                    vm.call_stack[ci_idx].pc = inst.num_val as usize;
                }
            }
            OpCode::JtOrPop | OpCode::JfOrPop => {
                let top = vm.stack.last().copied().unwrap_or_default();
                if top.is_truthy() == (inst.op == OpCode::JtOrPop) {
                    vm.call_stack[ci_idx].pc = inst.num_val as usize;
                } else {
                    pop(vm);
                }
            }
            OpCode::Clean => {
                let level = base + inst.num_val as usize;
                if let Some(e) = close_tbc(vm, ci_idx, level, None) {
                    return Err(e);
                }
                vm.close_upvalues(level);
                let end = (base + inst.num_val2 as usize + 1).min(vm.stack.len());
                for slot in level..end {
                    vm.stack[slot] = Value::Nil;
                }
            }
            OpCode::Tbc => {
                let slot = slot_index(vm, base, inst.num_val as usize)?;
                let v = vm.stack[slot];
                if v.is_falsy() {
                    continue;
                }
                if metamethod::get_metamethod(v, vm.mm_names.close, &vm.gc, vm.string_metatable).is_none() {
                    let name = match inst.symbol {
                        Some(sym) => vm.strings.get_str(sym.name).into_owned(),
                        None => "(for state)".to_string(),
                    };
                    return Err(vm.runtime_error(format!("variable '{name}' got a non-closable value")));
                }
                vm.call_stack[ci_idx].tbc_slots.push(slot);
            }
            OpCode::ForPrep => {
                let step = pop(vm);
                let limit = pop(vm);
                let init = pop(vm);
                let s = slot_index(vm, base, inst.num_val as usize + 3)? - 3;
                if !for_prep(vm, s, init, limit, step)? {
                    vm.call_stack[ci_idx].pc = inst.num_val2 as usize;
                }
            }
            OpCode::ForLoop => {
                let s = slot_index(vm, base, inst.num_val as usize + 3)? - 3;
                if for_loop(vm, s) {
                    vm.call_stack[ci_idx].pc = inst.num_val2 as usize;
                }
            }
            OpCode::VarArgs => {
                let (start, n) = {
                    let ci = &vm.call_stack[ci_idx];
                    (ci.varargs_start, ci.num_varargs)
                };
                if inst.num_val < 0 {
                    vm.stack.extend_from_within(start..start + n);
                    vm.stack.push(Value::Integer(n as i64));
                } else {
                    let want = inst.num_val as usize;
                    let have = want.min(n);
                    vm.stack.extend_from_within(start..start + have);
                    vm.stack.resize(vm.stack.len() + want - have, Value::Nil);
                }
            }
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Power
            | OpCode::FloorDiv
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::BitXor
            | OpCode::ShiftLeft
            | OpCode::ShiftRight => {
                let Some(op) = ArithOp::from_opcode(inst.op) else {
                    return Err(LuaError::Internal(format!("{} is not arithmetic", inst.op)));
                };
                let b = pop(vm);
                let a = pop(vm);
                let v = arith(vm, op, a, b, &inst)?;
                vm.stack.push(v);
            }
            OpCode::Concat => {
                gc_check(vm);
                let b = pop(vm);
                let a = pop(vm);
                let v = concat(vm, a, b, &inst)?;
                vm.stack.push(v);
            }
            OpCode::Eq => {
                let b = pop(vm);
                let a = pop(vm);
                let r = values_equal(vm, a, b)?;
                vm.stack.push(Value::Boolean(r));
            }
            OpCode::Less | OpCode::LessEq => {
                let b = pop(vm);
                let a = pop(vm);
                let r = less_than(vm, a, b, inst.op == OpCode::LessEq)?;
                vm.stack.push(Value::Boolean(r));
            }
            OpCode::Not => {
                let v = pop(vm);
                vm.stack.push(Value::Boolean(v.is_falsy()));
            }
            OpCode::Neg | OpCode::Len | OpCode::BitNot => {
                let v = pop(vm);
                let r = unary(vm, inst.op, v, &inst)?;
                vm.stack.push(r);
            }
        }
    }
}
