use lunette_compiler::opcode::OpCode;
use lunette_compiler::{compile, CompileError, CompileOptions, LuaVersion, Proto};
use lunette_core::string::StringInterner;

/// Compile a Lua source string and return the Proto + StringInterner.
pub fn compile_str(source: &str) -> (Proto, StringInterner) {
    compile_version(source, LuaVersion::Lua54)
        .unwrap_or_else(|e| panic!("compile failed: {e}\nsource:\n{source}"))
}

pub fn compile_version(
    source: &str,
    version: LuaVersion,
) -> Result<(Proto, StringInterner), CompileError> {
    let mut strings = StringInterner::new();
    let options = CompileOptions::new("=test").with_version(version);
    let proto = compile(source.as_bytes(), &options, &mut strings)?;
    Ok((proto, strings))
}

/// Compile a Lua source string and expect an error, returning its message.
pub fn compile_str_err(source: &str) -> String {
    match compile_version(source, LuaVersion::Lua54) {
        Err(e) => e.to_string(),
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

/// Check if a Proto contains a specific opcode.
pub fn has_opcode(proto: &Proto, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.op == op)
}

/// Count occurrences of an opcode in a Proto.
pub fn count_opcode(proto: &Proto, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.op == op).count()
}

/// Run `f` on a thread with a main-thread sized stack. Debug builds use large
/// frames, so deeply nested sources are checked there.
pub fn on_large_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(8 << 20)
        .spawn(f)
        .expect("spawn test thread")
        .join()
        .unwrap_or_else(|e| std::panic::resume_unwind(e))
}
