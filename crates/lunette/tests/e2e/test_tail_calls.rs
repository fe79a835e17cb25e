use super::helpers::*;

// ---- Tail calls ----

#[test]
fn test_tail_recursion_runs_in_constant_stack() {
    run_check_ints(
        "local function accumulate(n, acc)
            if n == 0 then return acc end
            return accumulate(n - 1, acc + 1)
         end
         return accumulate(20000, 0)",
        &[20000],
    );
}

#[test]
fn test_mutual_tail_recursion() {
    run_check_strings(
        "local is_even, is_odd
         function is_even(n) if n == 0 then return true end return is_odd(n - 1) end
         function is_odd(n) if n == 0 then return false end return is_even(n - 1) end
         return is_even(30001), is_odd(30001)",
        &["false", "true"],
    );
}

#[test]
fn test_non_tail_recursion_overflows_catchably() {
    let (results, mut script) = run_lua_in(
        "local function deep(n) return 1 + deep(n + 1) end
         local ok, err = pcall(deep, 1)
         return ok, err",
    );
    assert_bool(&results, 0, false);
    let msg = script.to_display_string(results[1]).unwrap();
    assert!(msg.contains("stack overflow"), "{msg}");
}

// ---- Multiple results ----

#[test]
fn test_vararg_forwarding_keeps_arity() {
    run_check_ints(
        "local function id(a, b, c) return a, b, c end
         local function fwd(...) return id(...) end
         return fwd(1, 2, 3)",
        &[1, 2, 3],
    );
}

#[test]
fn test_forwarding_trailing_nils() {
    let results = run_lua(
        "local function pass(...) return ... end
         return select('#', pass(1, nil, nil)), pass(nil, 2)",
    );
    assert_eq!(results.len(), 3);
    assert_int(&results, 0, 3);
    assert_nil(&results, 1);
    assert_int(&results, 2, 2);
}

#[test]
fn test_call_in_middle_is_truncated() {
    run_check_ints(
        "local function three() return 1, 2, 3 end
         local t = {three(), three()}
         return #t, (three())",
        &[4, 1],
    );
}

#[test]
fn test_tail_call_through_method() {
    run_check_ints(
        "local obj = {n = 0}
         function obj:count(k)
            if k == 0 then return self.n end
            self.n = self.n + 1
            return self:count(k - 1)
         end
         return obj:count(15000)",
        &[15000],
    );
}
