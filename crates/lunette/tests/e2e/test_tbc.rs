use super::helpers::*;

const CLOSER: &str = "local log = {}
local function closer(name)
  return setmetatable({}, {__close = function(_, err)
    log[#log + 1] = name .. (err and (':' .. tostring(err)) or '')
  end})
end
";

fn with_closer(body: &str) -> String {
    format!("{CLOSER}{body}")
}

#[test]
fn test_reverse_order_on_block_exit() {
    run_check_strings(
        &with_closer(
            "do
               local a <close> = closer('a')
               local b <close> = closer('b')
             end
             return table.concat(log, ',')",
        ),
        &["b,a"],
    );
}

#[test]
fn test_closed_on_break_and_return() {
    run_check_strings(
        &with_closer(
            "for i = 1, 3 do
               local x <close> = closer('loop' .. i)
               if i == 2 then break end
             end
             local function f()
               local r <close> = closer('ret')
               return 'value'
             end
             local v = f()
             return table.concat(log, ','), v",
        ),
        &["loop1,loop2,ret", "value"],
    );
}

#[test]
fn test_closed_on_goto_out_of_block() {
    run_check_strings(
        &with_closer(
            "do
               local g <close> = closer('g')
               goto out
             end
             ::out::
             return table.concat(log, ',')",
        ),
        &["g"],
    );
}

#[test]
fn test_closed_on_error_with_error_value() {
    run_check_strings(
        &with_closer(
            "local ok, e = pcall(function()
               local c <close> = closer('c')
               error('bad', 0)
             end)
             return ok, e, table.concat(log, ',')",
        ),
        &["false", "bad", "c:bad"],
    );
}

#[test]
fn test_nil_and_false_are_allowed() {
    run_check_ints(
        "do local a <close> = nil local b <close> = false end
         return 1",
        &[1],
    );
}

#[test]
fn test_non_closable_value() {
    let err = run_lua_err("local x <close> = {}");
    assert!(err.contains("variable 'x' got a non-closable value"), "{err}");
}

#[test]
fn test_close_variable_is_const() {
    let err = compile_err("local x <close> = nil x = 1");
    assert!(err.contains("attempt to assign to const variable 'x'"), "{err}");
}

#[test]
fn test_error_in_close_handler_replaces_error() {
    run_check_strings(
        "local ok, e = pcall(function()
            local c <close> = setmetatable({}, {__close = function() error('from close', 0) end})
            error('original', 0)
         end)
         return ok, e",
        &["false", "from close"],
    );
}
