#![no_main]

use libfuzzer_sys::fuzz_target;
use lunette_compiler::{compile, CompileOptions, LuaVersion};
use lunette_core::string::StringInterner;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, source)) = data.split_first() else {
        return;
    };
    let version = match selector % 3 {
        0 => LuaVersion::Lua52,
        1 => LuaVersion::Lua53,
        _ => LuaVersion::Lua54,
    };
    let mut options = CompileOptions::new("=fuzz").with_version(version);
    options.dynamic_expression = selector & 0x80 != 0;
    let mut strings = StringInterner::new();
    let _ = compile(source, &options, &mut strings);
});
