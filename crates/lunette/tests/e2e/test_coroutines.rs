use super::helpers::*;
use lunette::Value;

// ---- State machine ----

#[test]
fn test_yield_twice_then_return() {
    run_check_strings(
        "local states = {}
         local co
         co = coroutine.create(function(a)
            states[#states + 1] = coroutine.status(co)
            local b = coroutine.yield(a + 1)
            states[#states + 1] = coroutine.status(co)
            local c = coroutine.yield(b + 1)
            return c + 1
         end)
         states[#states + 1] = coroutine.status(co)
         local _, r1 = coroutine.resume(co, 1)
         states[#states + 1] = coroutine.status(co)
         local _, r2 = coroutine.resume(co, 10)
         states[#states + 1] = coroutine.status(co)
         local _, r3 = coroutine.resume(co, 100)
         states[#states + 1] = coroutine.status(co)
         return table.concat(states, ','), r1, r2, r3",
        &["suspended,running,suspended,running,suspended,dead", "2", "11", "101"],
    );
}

#[test]
fn test_resuming_dead_coroutine_is_an_error() {
    run_check_strings(
        "local co = coroutine.create(function() end)
         coroutine.resume(co)
         return coroutine.resume(co)",
        &["false", "cannot resume dead coroutine"],
    );
}

#[test]
fn test_resume_running_coroutine_fails() {
    run_check_strings(
        "local co
         co = coroutine.create(function() return coroutine.resume(co) end)
         local ok, inner_ok, msg = coroutine.resume(co)
         return ok, inner_ok, msg",
        &["true", "false", "cannot resume non-suspended coroutine"],
    );
}

#[test]
fn test_error_kills_coroutine() {
    let results = run_lua(
        "local co = coroutine.create(function() local x = nil; return x.y end)
         local ok = coroutine.resume(co)
         return ok, coroutine.status(co) == 'dead'",
    );
    assert_bool(&results, 0, false);
    assert_bool(&results, 1, true);
}

// ---- Generators ----

#[test]
fn test_wrap_as_iterator() {
    run_check_ints(
        "local function range(n)
            return coroutine.wrap(function()
               for i = 1, n do coroutine.yield(i) end
            end)
         end
         local sum = 0
         for v in range(100) do sum = sum + v end
         return sum",
        &[5050],
    );
}

#[test]
fn test_yield_from_nested_calls() {
    run_check_ints(
        "local function deep(n)
            if n == 0 then return coroutine.yield('bottom') end
            return deep(n - 1) + 1
         end
         local co = coroutine.create(function() return deep(5) end)
         coroutine.resume(co)
         local _, v = coroutine.resume(co, 10)
         return v",
        &[15],
    );
}

#[test]
fn test_yield_across_metamethod_boundary_fails() {
    let (results, mut script) = run_lua_in(
        "local t = setmetatable({}, {__index = function(_, k) return coroutine.yield(k) end})
         local co = coroutine.create(function() return t.answer end)
         return coroutine.resume(co)",
    );
    assert_bool(&results, 0, false);
    let msg = script.to_display_string(results[1]).unwrap();
    assert!(msg.ends_with("attempt to yield across a C-call boundary"), "{msg}");
}

#[test]
fn test_host_can_drive_a_coroutine() {
    let (mut script, _) = script_with_output();
    script
        .do_string("gen = coroutine.wrap(function() for i = 1, 3 do coroutine.yield(i * i) end end)", "=t")
        .unwrap();
    let squares: Vec<Value> = (0..3)
        .map(|_| script.call_global("gen", &[]).unwrap()[0])
        .collect();
    assert_eq!(squares, vec![Value::Integer(1), Value::Integer(4), Value::Integer(9)]);
}
