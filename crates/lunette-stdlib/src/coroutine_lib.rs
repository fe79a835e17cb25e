//! Coroutine library.
//!
//! Coroutines are VM threads addressed by `Value::Thread`. `wrap` returns a
//! host function whose single upvalue is the wrapped thread.

use crate::{register_lib, LibResult};
use lunette_core::value::{ThreadId, Value};
use lunette_vm::{CallbackResult, CoroutineStatus, ExecutionContext, LuaError, ResumeOutcome, Vm};

pub fn register(vm: &mut Vm) {
    let lib = register_lib(
        vm,
        "coroutine",
        &[
            ("create", co_create),
            ("resume", co_resume),
            ("yield", co_yield),
            ("status", co_status),
            ("isyieldable", co_isyieldable),
            ("running", co_running),
            ("close", co_close),
        ],
    );
    let step = vm.register_callback("wrap", wrap_step);
    vm.set_function(lib, "wrap", move |ctx, args| {
        let f = check_function(ctx, &args, 0)?;
        let tid = ctx.vm.create_thread(f);
        Ok(CallbackResult::one(ctx.vm.create_native(step, "wrap", vec![Value::Thread(tid)])))
    });
}

fn check_function(ctx: &mut ExecutionContext<'_>, args: &[Value], index: usize) -> Result<Value, LuaError> {
    match args.get(index) {
        Some(&f) if f.is_function() => Ok(f),
        _ => Err(ctx.type_error(args, index, "function")),
    }
}

fn check_thread(ctx: &mut ExecutionContext<'_>, args: &[Value], index: usize) -> Result<ThreadId, LuaError> {
    match args.get(index) {
        Some(Value::Thread(tid)) => Ok(*tid),
        _ => Err(ctx.type_error(args, index, "coroutine")),
    }
}

fn co_create(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let f = check_function(ctx, &args, 0)?;
    Ok(CallbackResult::one(Value::Thread(ctx.vm.create_thread(f))))
}

fn co_resume(ctx: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> LibResult {
    let tid = check_thread(ctx, &args, 0)?;
    args.remove(0);
    let mut results = vec![Value::Boolean(true)];
    match ctx.vm.resume(tid, args) {
        Ok(ResumeOutcome::Yielded(values) | ResumeOutcome::Returned(values)) => results.extend(values),
        Err(e) if e.is_catchable() => {
            results = vec![Value::Boolean(false), e.to_value(&mut ctx.vm.strings)];
        }
        Err(e) => return Err(e),
    }
    Ok(results.into())
}

fn co_yield(_ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    Ok(CallbackResult::Yield(args))
}

fn co_status(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let tid = check_thread(ctx, &args, 0)?;
    let name = ctx.vm.thread_status(tid).name();
    Ok(CallbackResult::one(ctx.intern(name)))
}

fn co_isyieldable(ctx: &mut ExecutionContext<'_>, _args: Vec<Value>) -> LibResult {
    Ok(CallbackResult::one(Value::Boolean(ctx.vm.is_yieldable())))
}

fn co_running(ctx: &mut ExecutionContext<'_>, _args: Vec<Value>) -> LibResult {
    let current = ctx.vm.current;
    Ok(vec![Value::Thread(current), Value::Boolean(current == ThreadId::MAIN)].into())
}

fn co_close(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let tid = check_thread(ctx, &args, 0)?;
    let status = ctx.vm.thread_status(tid);
    if matches!(status, CoroutineStatus::Running | CoroutineStatus::Normal) {
        return Err(ctx.error(format!("cannot close a {} coroutine", status.name())));
    }
    match ctx.vm.close_thread(tid) {
        Ok(()) => Ok(CallbackResult::one(Value::Boolean(true))),
        Err(e) => Ok(vec![Value::Boolean(false), e.to_value(&mut ctx.vm.strings)].into()),
    }
}

/// Body of the function `wrap` returns: resume, and re-raise failures in the
/// caller with its location prepended to string messages.
fn wrap_step(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let Value::Thread(tid) = ctx.upvalue(0) else {
        return Err(LuaError::Internal("wrap function lost its coroutine".into()));
    };
    match ctx.vm.resume(tid, args) {
        Ok(ResumeOutcome::Yielded(values) | ResumeOutcome::Returned(values)) => Ok(values.into()),
        Err(LuaError::Runtime { value: Value::String(id), .. }) => {
            let msg = ctx.str(id).into_owned();
            Err(ctx.error(msg))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{run, run_err, run_strings};
    use lunette_core::value::Value;

    #[test]
    fn test_yield_twice_then_return() {
        let src = r#"
            local co = coroutine.create(function(a)
                local b = coroutine.yield(a + 1)
                local c = coroutine.yield(b * 2)
                return c .. "!"
            end)
            local s = {coroutine.status(co)}
            local _, x = coroutine.resume(co, 1)
            s[#s + 1] = coroutine.status(co)
            local _, y = coroutine.resume(co, 10)
            local _, z = coroutine.resume(co, "done")
            s[#s + 1] = coroutine.status(co)
            local ok, err = coroutine.resume(co)
            return x, y, z, s[1], s[2], s[3], ok, err
        "#;
        assert_eq!(
            run_strings(src),
            vec![
                "2",
                "20",
                "done!",
                "suspended",
                "suspended",
                "dead",
                "false",
                "cannot resume dead coroutine"
            ]
        );
    }

    #[test]
    fn test_status_inside_coroutine() {
        let src = r#"
            local outer
            outer = coroutine.create(function()
                local inner = coroutine.create(function()
                    return coroutine.status(outer)
                end)
                local _, s = coroutine.resume(inner)
                return s, coroutine.status(outer), coroutine.isyieldable()
            end)
            return coroutine.resume(outer)
        "#;
        assert_eq!(run_strings(src), vec!["true", "normal", "running", "true"]);
    }

    #[test]
    fn test_error_inside_coroutine() {
        let src = r#"
            local co = coroutine.create(function() error("oops") end)
            return coroutine.resume(co)
        "#;
        let values = run_strings(src);
        assert_eq!(values[0], "false");
        assert!(values[1].ends_with("oops"), "{}", values[1]);
    }

    #[test]
    fn test_wrap_generator() {
        let src = r#"
            local gen = coroutine.wrap(function()
                for i = 1, 3 do coroutine.yield(i) end
            end)
            return gen() + gen() + gen()
        "#;
        assert_eq!(run(src), vec![Value::Integer(6)]);
        let src = "local f = coroutine.wrap(function() end) f() f()";
        assert!(run_err(src).contains("cannot resume dead coroutine"));
    }

    #[test]
    fn test_yield_outside_coroutine() {
        let values = run_strings("return pcall(coroutine.yield, 1)");
        assert_eq!(values[0], "false");
        assert!(values[1].ends_with("attempt to yield from outside a coroutine"));
    }

    #[test]
    fn test_yield_across_pcall() {
        let src = r#"
            local co = coroutine.create(function()
                local ok, v = pcall(function() return coroutine.yield(1) + 1 end)
                return ok, v
            end)
            coroutine.resume(co)
            return coroutine.resume(co, 41)
        "#;
        assert_eq!(
            run(src),
            vec![Value::Boolean(true), Value::Boolean(true), Value::Integer(42)]
        );
    }

    #[test]
    fn test_close_runs_pending_close_handlers() {
        let src = r#"
            local log = {}
            local co = coroutine.create(function()
                local r <close> = setmetatable({}, {__close = function() log[#log + 1] = "closed" end})
                coroutine.yield()
            end)
            coroutine.resume(co)
            local ok = coroutine.close(co)
            return ok, log[1], coroutine.status(co)
        "#;
        assert_eq!(run_strings(src), vec!["true", "closed", "dead"]);
    }

    #[test]
    fn test_running_in_main() {
        let values = run_strings("local co, main = coroutine.running() return type(co), main");
        assert_eq!(values, vec!["thread", "true"]);
    }
}
