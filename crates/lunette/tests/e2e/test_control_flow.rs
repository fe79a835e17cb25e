use super::helpers::*;

// ---- break ----

#[test]
fn test_break_leaves_only_the_innermost_loop() {
    run_check_strings(
        "local out = {}
         for i = 1, 3 do
            for j = 1, 3 do
               out[#out + 1] = i .. '-' .. j
               break
            end
         end
         return out[1], out[2], out[3], #out",
        &["1-1", "2-1", "3-1", "3"],
    );
}

#[test]
fn test_break_in_function_inside_loop_is_rejected() {
    let err = compile_err("while true do local f = function() break end end");
    assert!(err.contains("not inside a loop"), "{err}");
}

#[test]
fn test_break_outside_loop_is_rejected() {
    let err = compile_err("do break end");
    assert!(err.contains("<break> at line 1 not inside a loop"), "{err}");
}

#[test]
fn test_break_from_repeat_and_while() {
    run_check_ints(
        "local n = 0
         repeat n = n + 1 if n == 5 then break end until false
         local m = 0
         while true do m = m + 2 if m > 7 then break end end
         return n, m",
        &[5, 8],
    );
}

// ---- goto ----

#[test]
fn test_goto_continue_pattern() {
    run_check_ints(
        "local sum = 0
         for i = 1, 10 do
            if i % 2 == 0 then goto continue end
            sum = sum + i
            ::continue::
         end
         return sum",
        &[25],
    );
}

#[test]
fn test_backward_goto_loop() {
    run_check_ints(
        "local i = 0
         ::top::
         i = i + 1
         if i < 10 then goto top end
         return i",
        &[10],
    );
}

#[test]
fn test_goto_undefined_label() {
    let err = compile_err("goto nowhere");
    assert!(err.contains("no visible label 'nowhere'"), "{err}");
}

#[test]
fn test_goto_into_local_scope() {
    let err = compile_err("goto l local x = 1 ::l:: print(x)");
    assert!(err.contains("jumps into the scope of local 'x'"), "{err}");
}

#[test]
fn test_goto_label_at_block_end_is_outside_locals() {
    run_check_ints(
        "local n = 0
         do
            goto done
            local x = 1
            n = x
            ::done::
         end
         return n",
        &[0],
    );
}

#[test]
fn test_goto_into_nested_block_is_rejected() {
    let err = compile_err("goto inner do ::inner:: end");
    assert!(err.contains("no visible label 'inner'"), "{err}");
}

#[test]
fn test_goto_out_of_nested_function_is_rejected() {
    let err = compile_err("::l:: local f = function() goto l end");
    assert!(err.contains("no visible label 'l'"), "{err}");
}

// ---- Numeric for ----

#[test]
fn test_integer_for_at_the_limits() {
    run_check_ints(
        "local n = 0
         for i = math.maxinteger - 2, math.maxinteger do n = n + 1 end
         for i = math.mininteger, math.mininteger + 2 do n = n + 1 end
         return n",
        &[6],
    );
}

#[test]
fn test_for_step_zero() {
    let err = run_lua_err("for i = 1, 10, 0 do end");
    assert!(err.contains("'for' step is zero"), "{err}");
}

#[test]
fn test_float_for_loop() {
    let results = run_lua("local s = 0 for x = 0, 1, 0.25 do s = s + x end return s");
    assert_float(&results, 0, 2.5);
}

#[test]
fn test_generic_for_with_closure_iterator() {
    run_check_ints(
        "local function range(n)
            local i = 0
            return function() i = i + 1 if i <= n then return i end end
         end
         local total = 0
         for v in range(4) do total = total + v end
         return total",
        &[10],
    );
}

#[test]
fn test_pairs_and_ipairs() {
    run_check_ints(
        "local t = {10, 20, 30, x = 1, y = 2}
         local n, sum = 0, 0
         for k, v in pairs(t) do n = n + 1 sum = sum + v end
         local seq = 0
         for i, v in ipairs(t) do seq = seq + i end
         return n, sum, seq",
        &[5, 63, 6],
    );
}
