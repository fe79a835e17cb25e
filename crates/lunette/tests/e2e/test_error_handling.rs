use super::helpers::*;
use lunette::{LuaError, Value};

// ---- Decoration ----

#[test]
fn test_runtime_error_carries_chunk_and_line() {
    let err = run_lua_err("local t = nil\n\nreturn t.x");
    assert_eq!(err, "test:3: attempt to index a nil value (local 't')");
}

#[test]
fn test_error_levels() {
    run_check_strings(
        "local function lvl1() error('one') end
         local function lvl2() error('two', 2) end
         local function lvl0() error('zero', 0) end
         local _, a = pcall(lvl1)
         local _, b = pcall(function()
            lvl2()
         end)
         local _, c = pcall(lvl0)
         return a, b, c",
        &["test:1: one", "test:6: two", "zero"],
    );
}

#[test]
fn test_table_error_values_are_not_decorated() {
    run_check_ints(
        "local ok, e = pcall(error, {code = 42})
         return e.code",
        &[42],
    );
}

#[test]
fn test_uncaught_table_error_reaches_host() {
    let (mut script, _) = script_with_output();
    let err = script.do_string("error(setmetatable({}, {__tostring = function() return 'custom' end}))", "=t");
    match err {
        Err(LuaError::Runtime { value: Value::Table(_), .. }) => {}
        other => panic!("unexpected {other:?}"),
    }
}

// ---- Protected calls ----

#[test]
fn test_pcall_success_and_failure() {
    run_check_strings(
        "local ok1, v = pcall(function(a, b) return a + b end, 2, 3)
         local ok2, e = pcall(function() local x = nil; return x() end)
         return ok1, v, ok2, e",
        &["true", "5", "false", "test:2: attempt to call a nil value (local 'x')"],
    );
}

#[test]
fn test_xpcall_handler_sees_original_error() {
    run_check_strings(
        "local function handler(e) return 'handled: ' .. e end
         return xpcall(function() error('boom', 0) end, handler)",
        &["false", "handled: boom"],
    );
}

#[test]
fn test_xpcall_passes_arguments() {
    run_check_ints(
        "local ok, a, b = xpcall(function(x, y) return y, x end, print, 1, 2)
         return a, b",
        &[2, 1],
    );
}

#[test]
fn test_nested_pcall_unwinds_to_innermost() {
    run_check_strings(
        "local log = {}
         local ok = pcall(function()
            local inner_ok = pcall(error, 'inner')
            log[#log + 1] = tostring(inner_ok)
            error('outer')
         end)
         log[#log + 1] = tostring(ok)
         return table.concat(log, ',')",
        &["false,false"],
    );
}

#[test]
fn test_error_in_metamethod_propagates_through_pcall() {
    run_check_strings(
        "local t = setmetatable({}, {__index = function() error('no field', 0) end})
         return pcall(function() return t.missing end)",
        &["false", "no field"],
    );
}

#[test]
fn test_assert_messages() {
    run_check_strings(
        "local _, a = pcall(assert, false)
         local _, b = pcall(assert, nil, 'custom message')
         local c, d = assert(1, 'unused')
         return a, b, c, d",
        &["assertion failed!", "custom message", "1", "unused"],
    );
}

// ---- Host-visible errors ----

#[test]
fn test_uncaught_error_has_traceback() {
    let (mut script, _) = script_with_output();
    let err = script
        .do_string("local function inner() error('deep') end\nlocal function outer() inner() end\nouter()", "=tb")
        .unwrap_err();
    let tb = err.traceback().expect("traceback");
    assert!(tb.starts_with("stack traceback:"), "{tb}");
    assert!(tb.contains("tb:1:"), "{tb}");
}

#[test]
fn test_host_callback_error_is_decorated_with_caller_line() {
    let (mut script, _) = script_with_output();
    script.register_function("fail", |ctx, _args| Err(ctx.error("host says no")));
    let err = script.do_string("local x = 1\nfail()", "=cb").unwrap_err();
    assert_eq!(err.to_string(), "cb:2: host says no");
}

#[test]
fn test_load_returns_syntax_errors_as_values() {
    let (results, mut script) = run_lua_in("return load('x = = 1', '=chunk')");
    assert_nil(&results, 0);
    let msg = script.to_display_string(results[1]).unwrap();
    assert!(msg.starts_with("chunk:(1,"), "{msg}");
    assert!(msg.ends_with("unexpected symbol near '='"), "{msg}");
}

// ---- Limits ----

#[test]
fn test_deep_nesting_is_a_syntax_error() {
    let (premature, message) = on_large_stack(|| {
        let (mut script, _) = script_with_output();
        let src = "(".repeat(10_000);
        match script.do_string(&src, "=deep") {
            Err(LuaError::Syntax(e)) => (e.premature_end, e.to_string()),
            other => panic!("expected syntax error, got {other:?}"),
        }
    });
    assert!(!premature);
    assert!(message.ends_with("chunk has too many C levels near '('"), "{message}");
}

#[test]
fn test_deep_nesting_through_load_is_catchable() {
    let (rejected, value) = on_large_stack(|| {
        let src = "local src = 'return ' .. string.rep('(', 1000) .. '1' .. string.rep(')', 1000)
                   local f, err = load(src)
                   return f == nil, err";
        let (results, mut script) = run_lua_in(src);
        let msg = script.to_display_string(results[1]).unwrap();
        (results[0] == Value::Boolean(true), msg)
    });
    assert!(rejected);
    assert!(value.contains("chunk has too many C levels"), "{value}");
}

#[test]
fn test_nesting_below_the_limit_runs() {
    on_large_stack(|| {
        let src = format!("return {}1{}", "(".repeat(150), ")".repeat(150));
        assert_int(&run_lua(&src), 0, 1);
    });
}
