use super::helpers::*;
use lunette_compiler::LuaVersion;

#[test]
fn e2e_integer_division_needs_53() {
    assert!(compile_version("return 7 // 2", LuaVersion::Lua53).is_ok());
    let err = compile_version("return 7 // 2", LuaVersion::Lua52).unwrap_err();
    assert!(err.to_string().contains("requires Lua 5.3+ compatibility"), "{err}");
}

#[test]
fn e2e_bitwise_ops_need_53() {
    for src in ["return 1 & 2", "return 1 | 2", "return 1 << 2", "return ~1"] {
        assert!(compile_version(src, LuaVersion::Lua52).is_err(), "{src}");
        assert!(compile_version(src, LuaVersion::Lua53).is_ok(), "{src}");
    }
}

#[test]
fn e2e_attributes_need_54() {
    assert!(compile_version("local x <const> = 1", LuaVersion::Lua54).is_ok());
    let err = compile_version("local x <const> = 1", LuaVersion::Lua53).unwrap_err();
    assert!(err.to_string().contains("requires Lua 5.4+ compatibility"), "{err}");
}

#[test]
fn e2e_goto_available_in_52() {
    assert!(compile_version("goto a; ::a::", LuaVersion::Lua52).is_ok());
}
