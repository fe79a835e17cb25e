use super::helpers::*;
use lunette::LuaVersion;

#[test]
fn test_const_accepted_under_54() {
    run_check_ints("local x <const> = 41 return x + 1", &[42]);
}

#[test]
fn test_const_rejected_under_53_names_the_version() {
    let err = compile_err_with("local x <const> = 1", LuaVersion::Lua53);
    assert!(
        err.contains("attribute '<const>' requires Lua 5.4+ compatibility (current: Lua 5.3)"),
        "{err}"
    );
    let err = compile_err_with("local f <close> = nil", LuaVersion::Lua52);
    assert!(err.contains("requires Lua 5.4+"), "{err}");
}

#[test]
fn test_duplicate_attribute_always_rejected() {
    for version in [LuaVersion::Lua52, LuaVersion::Lua53, LuaVersion::Lua54] {
        compile_err_with("local x <const><const> = 1", version);
    }
    let err = compile_err("local x <const><const> = 1");
    assert!(err.contains("duplicate attribute 'const'"), "{err}");
    let err = compile_err("local x <const><close> = 1");
    assert!(err.contains("multiple attributes for local 'x'"), "{err}");
}

#[test]
fn test_unknown_attribute_always_rejected() {
    for version in [LuaVersion::Lua53, LuaVersion::Lua54] {
        let err = compile_err_with("local x <fast> = 1", version);
        assert!(err.contains("unknown attribute 'fast'"), "{version}: {err}");
    }
}

#[test]
fn test_assign_to_const() {
    let err = compile_err("local x <const> = 1 x = 2");
    assert!(err.contains("attempt to assign to const variable 'x'"), "{err}");
    let err = compile_err("local x <const> = 1 local function f() x = 2 end");
    assert!(err.contains("attempt to assign to const variable 'x'"), "{err}");
}

#[test]
fn test_integer_division_gated_before_53() {
    let err = compile_err_with("return 7 // 2", LuaVersion::Lua52);
    assert!(err.contains("'//' operator requires Lua 5.3+ compatibility (current: Lua 5.2)"), "{err}");
    run_check_ints("return 7 // 2, 6 & 3, 1 << 4", &[3, 2, 16]);
}

#[test]
fn test_const_captured_by_closure() {
    run_check_ints(
        "local base <const> = 10
         local function add(n) return base + n end
         return add(5)",
        &[15],
    );
}
