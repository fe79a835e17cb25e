use super::helpers::*;
use lunette::Value;

// ---- Arithmetic ----

#[test]
fn test_vector_arithmetic() {
    run_check_ints(
        "local V = {}
         V.__index = V
         local function vec(x, y) return setmetatable({x = x, y = y}, V) end
         V.__add = function(a, b) return vec(a.x + b.x, a.y + b.y) end
         V.__unm = function(a) return vec(-a.x, -a.y) end
         V.__mul = function(a, k) return vec(a.x * k, a.y * k) end
         local v = -(vec(1, 2) + vec(3, 4)) * 2
         return v.x, v.y",
        &[-8, -12],
    );
}

#[test]
fn test_second_operand_metamethod() {
    run_check_ints(
        "local mt = {__sub = function(a, b) return 100 end}
         local t = setmetatable({}, mt)
         return 5 - t, t - 5",
        &[100, 100],
    );
}

#[test]
fn test_missing_metamethod_names_operation_and_type() {
    let err = run_lua_err("local t = {} return t + 1");
    assert!(err.contains("attempt to perform arithmetic on a table value (local 't')"), "{err}");
    let err = run_lua_err("return {} .. 'x'");
    assert!(err.contains("attempt to concatenate a table value"), "{err}");
}

// ---- Comparison ----

#[test]
fn test_eq_lt_le() {
    run_check_strings(
        "local mt = {}
         mt.__eq = function(a, b) return a.v == b.v end
         mt.__lt = function(a, b) return a.v < b.v end
         mt.__le = function(a, b) return a.v <= b.v end
         local a = setmetatable({v = 1}, mt)
         local b = setmetatable({v = 1}, mt)
         local c = setmetatable({v = 2}, mt)
         return a == b, a ~= c, a < c, c <= a, rawequal(a, b)",
        &["true", "true", "true", "false", "false"],
    );
}

#[test]
fn test_compare_without_metamethod() {
    let err = run_lua_err("return {} < {}");
    assert!(err.contains("attempt to compare two table values"), "{err}");
    let err = run_lua_err("return 1 < 'x'");
    assert!(err.contains("attempt to compare number with string"), "{err}");
}

// ---- Indexing ----

#[test]
fn test_index_function_and_table_chain() {
    run_check_ints(
        "local base = {a = 1}
         local mid = setmetatable({b = 2}, {__index = base})
         local top = setmetatable({}, {__index = mid})
         local computed = setmetatable({}, {__index = function(_, k) return k * 10 end})
         return top.a, top.b, computed[4]",
        &[1, 2, 40],
    );
}

#[test]
fn test_newindex_redirect() {
    run_check_ints(
        "local store = {}
         local proxy = setmetatable({}, {__newindex = store})
         proxy.x = 5
         local log = 0
         local counted = setmetatable({}, {__newindex = function(t, k, v) log = log + 1 rawset(t, k, v) end})
         counted.a = 1
         counted.a = 2
         return store.x, rawget(proxy, 'x') == nil and 1 or 0, counted.a, log",
        &[5, 1, 2, 1],
    );
}

#[test]
fn test_len_and_concat() {
    run_check_strings(
        "local t = setmetatable({}, {
            __len = function() return 99 end,
            __concat = function(a, b) return 'joined' end,
         })
         return #t, t .. 'x', 'x' .. t",
        &["99", "joined", "joined"],
    );
}

// ---- Calls ----

#[test]
fn test_call_metamethod_receives_self() {
    run_check_ints(
        "local callable = setmetatable({n = 7}, {__call = function(self, a, b) return self.n + a + b end})
         return callable(1, 2)",
        &[10],
    );
}

#[test]
fn test_call_chain_loop_is_detected() {
    let err = run_lua_err(
        "local a = {}
         setmetatable(a, {__call = a})
         return a()",
    );
    assert!(err.contains("loop in call") || err.contains("attempt to call"), "{err}");
}

#[test]
fn test_uncallable_call_handler_names_the_original_value() {
    let err = run_lua_err(
        "local t = setmetatable({}, {__call = 1})
         local r = t()
         return r",
    );
    assert_eq!(err, "test:2: attempt to call a table value (local 't')");

    let (results, script) = run_lua_in("return pcall(setmetatable({}, {__call = 'nope'}))");
    assert_bool(&results, 0, false);
    let Value::String(id) = results[1] else {
        panic!("expected an error message, got {:?}", results[1]);
    };
    let msg = script.vm().strings.get_str(id).into_owned();
    assert!(msg.ends_with("attempt to call a table value"), "{msg}");
}

#[test]
fn test_call_non_function() {
    let err = run_lua_err("local x = 5 x()");
    assert!(err.contains("attempt to call a number value (local 'x')"), "{err}");
}

// ---- tostring and metatable protection ----

#[test]
fn test_tostring_and_name() {
    run_check_strings(
        "local p = setmetatable({}, {__tostring = function() return 'point' end})
         local q = setmetatable({}, {__name = 'Thing'})
         return tostring(p), tostring(q):sub(1, 6)",
        &["point", "Thing:"],
    );
}

#[test]
fn test_protected_metatable() {
    let (results, script) = run_lua_in(
        "local t = setmetatable({}, {__metatable = 'locked'})
         local ok, err = pcall(setmetatable, t, {})
         return getmetatable(t), ok, err",
    );
    assert_str(&results, 0, "locked", &script);
    assert_bool(&results, 1, false);
    let Value::String(id) = results[2] else { panic!("expected message, got {:?}", results[2]) };
    assert!(script.vm().strings.get_str(id).ends_with("cannot change a protected metatable"));
}

#[test]
fn test_string_methods_through_shared_metatable() {
    run_check_strings("local s = 'Hello' return s:upper(), s:len(), ('x'):rep(3)", &["HELLO", "5", "xxx"]);
}
