//! Lunette: an embeddable Lua-compatible scripting engine.
//!
//! [`Script`] is the host-facing facade. It owns one VM with the standard
//! library opened and wraps compilation, execution, dynamic expressions,
//! binary chunks and debugger attachment:
//!
//! ```no_run
//! use lunette::Script;
//!
//! let mut script = Script::new();
//! let results = script.do_string("return 1 + 2", "=example").unwrap();
//! assert_eq!(results[0], lunette::Value::Integer(3));
//! ```

pub use lunette_compiler::{CompileError, CompileOptions, LuaVersion, Proto, SyntaxError};
pub use lunette_core::value::Value;
pub use lunette_stdlib::PrintSink;
pub use lunette_vm::{
    CallbackResult, DebugService, Debugger, DebuggerAction, ExecutionContext, LuaError, PauseInfo,
    PauseReason, Vm, VmOptions,
};

use lunette_compiler::disasm;
use lunette_core::gc::GcIdx;
use lunette_core::table::Table;
use std::path::Path;

/// Chunk name given to dynamic expressions.
const DYNAMIC_CHUNK: &str = "=expression";

// ---- Options ----

/// Everything a host can tune on a [`Script`].
#[derive(Clone)]
pub struct ScriptOptions {
    /// Dialect accepted by the compiler and reported by `_VERSION`.
    pub version: LuaVersion,
    pub vm: VmOptions,
    /// Destination of `print`; stdout when unset.
    pub print: Option<PrintSink>,
    /// Open the standard library on creation.
    pub open_libs: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        ScriptOptions {
            version: LuaVersion::default(),
            vm: VmOptions::default(),
            print: None,
            open_libs: true,
        }
    }
}

impl std::fmt::Debug for ScriptOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptOptions")
            .field("version", &self.version)
            .field("vm", &self.vm)
            .field("print", &self.print.as_ref().map(|_| "<sink>"))
            .field("open_libs", &self.open_libs)
            .finish()
    }
}

impl ScriptOptions {
    pub fn with_version(mut self, version: LuaVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.vm = self.vm.with_max_call_depth(depth);
        self
    }

    pub fn with_max_native_depth(mut self, depth: usize) -> Self {
        self.vm = self.vm.with_max_native_depth(depth);
        self
    }

    pub fn with_gc_step_threshold(mut self, threshold: usize) -> Self {
        self.vm = self.vm.with_gc_step_threshold(threshold);
        self
    }

    pub fn with_print(mut self, sink: PrintSink) -> Self {
        self.print = Some(sink);
        self
    }

    /// Start with empty globals.
    pub fn without_libs(mut self) -> Self {
        self.open_libs = false;
        self
    }

    fn compile_options(&self, chunk_name: &str) -> CompileOptions {
        CompileOptions::new(chunk_name).with_version(self.version)
    }
}

// ---- Dynamic expressions ----

/// A compiled single expression, evaluated against the script's globals.
///
/// The compiled function is anchored in the owning script's registry until
/// [`Script::release_expression`] is called.
#[derive(Debug)]
pub struct DynamicExpression {
    key: i64,
    source: String,
}

impl DynamicExpression {
    pub fn source(&self) -> &str {
        &self.source
    }
}

// ---- Script ----

/// One independent interpreter: a VM, its globals and its libraries.
pub struct Script {
    vm: Vm,
    options: ScriptOptions,
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

impl Script {
    pub fn new() -> Self {
        Self::with_options(ScriptOptions::default())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(version = %options.version))]
    pub fn with_options(options: ScriptOptions) -> Self {
        let mut vm = Vm::with_options(options.vm.clone().with_version(options.version));
        if options.open_libs {
            match &options.print {
                Some(sink) => lunette_stdlib::open_libs_with_print(&mut vm, sink.clone()),
                None => lunette_stdlib::open_libs(&mut vm),
            }
        }
        Script { vm, options }
    }

    pub fn options(&self) -> &ScriptOptions {
        &self.options
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// The global table (`_ENV` of every chunk this script loads).
    pub fn globals(&self) -> GcIdx<Table> {
        self.vm.globals
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.vm.get_global(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.vm.set_global(name, value);
    }

    /// Expose a host function as a global.
    pub fn register_function<F>(&mut self, name: &str, f: F) -> Value
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<CallbackResult, LuaError> + 'static,
    {
        let func = self.vm.create_function(name, f);
        self.vm.set_global(name, func);
        func
    }

    /// Intern a string and return it as a value.
    pub fn string(&mut self, s: &str) -> Value {
        self.vm.intern(s)
    }

    /// `tostring` of a value, running `__tostring` when present.
    pub fn to_display_string(&mut self, value: Value) -> Result<String, LuaError> {
        let id = self.vm.tostring(value)?;
        Ok(self.vm.strings.get_str(id).into_owned())
    }

    // ---- Compilation and loading ----

    /// Compile source text without loading it.
    pub fn compile(&mut self, source: &str, chunk_name: &str) -> Result<Proto, LuaError> {
        let options = self.options.compile_options(chunk_name);
        Ok(lunette_compiler::compile(source.as_bytes(), &options, &mut self.vm.strings)?)
    }

    /// Bytecode listing of a chunk and its nested functions.
    pub fn disassemble(&mut self, source: &str, chunk_name: &str) -> Result<String, LuaError> {
        let proto = self.compile(source, chunk_name)?;
        Ok(disasm::disassemble(&proto, &self.vm.strings))
    }

    /// Load source text or a binary chunk as a function.
    pub fn load(&mut self, source: &[u8], chunk_name: &str) -> Result<Value, LuaError> {
        self.vm.load(source, chunk_name)
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Value, LuaError> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|e| {
            let msg = format!("cannot open {}: {e}", path.display());
            LuaError::runtime(msg, &mut self.vm.strings)
        })?;
        self.load(strip_shebang(&source), &format!("@{}", path.display()))
    }

    /// Load a compiled prototype, with `_ENV` bound to the globals.
    pub fn load_proto(&mut self, proto: Proto) -> Value {
        self.vm.load_proto(proto, None)
    }

    #[tracing::instrument(level = "debug", skip(self, source))]
    pub fn do_string(&mut self, source: &str, chunk_name: &str) -> Result<Vec<Value>, LuaError> {
        let f = self.load(source.as_bytes(), chunk_name)?;
        self.call(f, &[])
    }

    pub fn do_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<Value>, LuaError> {
        let f = self.load_file(path)?;
        self.call(f, &[])
    }

    pub fn call(&mut self, func: Value, args: &[Value]) -> Result<Vec<Value>, LuaError> {
        self.vm.call_value(func, args)
    }

    /// Call the global function `name`.
    pub fn call_global(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, LuaError> {
        let func = self.vm.get_global(name);
        self.call(func, args)
    }

    // ---- Binary chunks ----

    /// Serialize a Lua function. `strip` drops line and local-name info.
    pub fn dump(&mut self, func: Value, strip: bool) -> Result<Vec<u8>, LuaError> {
        self.vm.dump_function(func, strip)
    }

    /// Load a chunk produced by [`Script::dump`]. Source text is rejected.
    pub fn undump(&mut self, data: &[u8], chunk_name: &str) -> Result<Value, LuaError> {
        if !lunette_vm::binary_chunk::is_binary_chunk(data) {
            let msg = format!("{}: not a binary chunk", CompileOptions::new(chunk_name).display_chunk_name());
            return Err(LuaError::runtime(msg, &mut self.vm.strings));
        }
        self.load(data, chunk_name)
    }

    // ---- Dynamic expressions ----

    /// Compile a single expression whose free names are looked up in the
    /// globals directly. Failures are reported as [`LuaError::Dynamic`].
    pub fn create_dynamic_expression(&mut self, source: &str) -> Result<DynamicExpression, LuaError> {
        let mut options = self.options.compile_options(DYNAMIC_CHUNK);
        options.dynamic_expression = true;
        let proto = lunette_compiler::compile(source.as_bytes(), &options, &mut self.vm.strings)
            .map_err(|e| LuaError::Dynamic(e.to_string()))?;
        let func = self.vm.load_proto(proto, None);
        let key = self.vm.pin(func);
        tracing::trace!(key, "dynamic expression compiled");
        Ok(DynamicExpression {
            key,
            source: source.to_string(),
        })
    }

    /// Evaluate an expression and return its first value.
    pub fn evaluate(&mut self, expr: &DynamicExpression) -> Result<Value, LuaError> {
        let func = self.vm.pinned(expr.key);
        if func == Value::Nil {
            return Err(LuaError::Dynamic(format!("expression '{}' was released", expr.source)));
        }
        match self.vm.call_value(func, &[]) {
            Ok(values) => Ok(values.first().copied().unwrap_or_default()),
            Err(LuaError::Dynamic(msg)) => Err(LuaError::Dynamic(msg)),
            Err(e) => Err(LuaError::Dynamic(e.to_string())),
        }
    }

    /// Compile and evaluate in one step.
    pub fn eval(&mut self, source: &str) -> Result<Value, LuaError> {
        let expr = self.create_dynamic_expression(source)?;
        let result = self.evaluate(&expr);
        self.release_expression(expr);
        result
    }

    pub fn release_expression(&mut self, expr: DynamicExpression) {
        self.vm.unpin(expr.key);
    }

    // ---- Debugging ----

    pub fn attach_debugger(&mut self, debugger: Box<dyn Debugger>) -> &mut DebugService {
        self.vm.debug.insert(DebugService::new(debugger))
    }

    pub fn debug_service(&mut self) -> Option<&mut DebugService> {
        self.vm.debug.as_mut()
    }

    pub fn detach_debugger(&mut self) -> Option<DebugService> {
        self.vm.detach_debugger()
    }

    /// Run a full collection; returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.vm.collect_garbage()
    }
}

/// Drop a leading `#` line so executable scripts can carry a shebang.
pub fn strip_shebang(source: &[u8]) -> &[u8] {
    if !source.starts_with(b"#") {
        return source;
    }
    match source.iter().position(|&b| b == b'\n') {
        // Keep the newline so line numbers stay right.
        Some(pos) => &source[pos..],
        None => b"",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn captured() -> (Script, Rc<RefCell<Vec<String>>>) {
        let out = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&out);
        let options = ScriptOptions::default().with_print(Rc::new(move |line: &str| {
            sink.borrow_mut().push(line.to_string())
        }));
        (Script::with_options(options), out)
    }

    #[test]
    fn test_print_goes_to_sink() {
        let (mut script, out) = captured();
        script.do_string("print('a', 1, nil)", "=t").unwrap();
        assert_eq!(*out.borrow(), vec!["a\t1\tnil".to_string()]);
    }

    #[test]
    fn test_version_option_reaches_compiler_and_globals() {
        let mut script = Script::with_options(ScriptOptions::default().with_version(LuaVersion::Lua53));
        let v = script.do_string("return _VERSION", "=t").unwrap();
        assert_eq!(script.to_display_string(v[0]).unwrap(), "Lua 5.3");
        let err = script.do_string("local x <const> = 1", "=t").unwrap_err();
        assert!(matches!(err, LuaError::Syntax(_)), "{err}");
    }

    #[test]
    fn test_register_function_and_call_global() {
        let mut script = Script::new();
        script.register_function("double", |ctx, args| {
            let n = ctx.check_integer(&args, 0)?;
            Ok(CallbackResult::one(Value::Integer(n * 2)))
        });
        script.do_string("function twice_plus_one(x) return double(x) + 1 end", "=t").unwrap();
        let r = script.call_global("twice_plus_one", &[Value::Integer(20)]).unwrap();
        assert_eq!(r, vec![Value::Integer(41)]);
    }

    #[test]
    fn test_dynamic_expression_sees_globals() {
        let mut script = Script::new();
        script.do_string("x = 10", "=t").unwrap();
        let expr = script.create_dynamic_expression("x * 2 + 1").unwrap();
        assert_eq!(script.evaluate(&expr).unwrap(), Value::Integer(21));
        script.set_global("x", Value::Integer(1));
        assert_eq!(script.evaluate(&expr).unwrap(), Value::Integer(3));
        assert_eq!(expr.source(), "x * 2 + 1");
        script.release_expression(expr);
    }

    #[test]
    fn test_dynamic_errors_are_prefixed() {
        let mut script = Script::new();
        let err = script.eval("y.z").unwrap_err();
        assert!(matches!(err, LuaError::Dynamic(_)));
        assert!(err.to_string().starts_with("<dynamic>: "), "{err}");
        let err = script.create_dynamic_expression("x = 1").unwrap_err();
        assert!(err.to_string().starts_with("<dynamic>: "), "{err}");
    }

    #[test]
    fn test_dynamic_expression_survives_collection() {
        let mut script = Script::new();
        let expr = script.create_dynamic_expression("'ok'").unwrap();
        script.collect_garbage();
        let v = script.evaluate(&expr).unwrap();
        assert_eq!(script.to_display_string(v).unwrap(), "ok");
    }

    #[test]
    fn test_dump_and_undump() {
        let mut script = Script::new();
        let f = script.load(b"local a, b = ... return a * b", "=mul").unwrap();
        let bytes = script.dump(f, false).unwrap();
        let g = script.undump(&bytes, "=mul").unwrap();
        assert_eq!(
            script.call(g, &[Value::Integer(6), Value::Integer(7)]).unwrap(),
            vec![Value::Integer(42)]
        );
        let err = script.undump(b"return 1", "=text").unwrap_err();
        assert!(err.to_string().contains("not a binary chunk"));
    }

    #[test]
    fn test_disassemble_lists_nested_functions() {
        let mut script = Script::new();
        let listing = script.disassemble("local function f() return 1 end", "=d").unwrap();
        assert!(listing.matches("function").count() >= 2, "{listing}");
    }

    #[test]
    fn test_without_libs() {
        let mut script = Script::with_options(ScriptOptions::default().without_libs());
        assert_eq!(script.get_global("print"), Value::Nil);
        assert_eq!(script.do_string("return 1 + 1", "=t").unwrap(), vec![Value::Integer(2)]);
    }

    #[test]
    fn test_strip_shebang_keeps_line_numbers() {
        assert_eq!(strip_shebang(b"#!/usr/bin/env lunette\nx"), b"\nx");
        assert_eq!(strip_shebang(b"x = 1"), b"x = 1");
        assert_eq!(strip_shebang(b"#only"), b"");
    }

    #[test]
    fn test_load_file_reports_missing_path() {
        let mut script = Script::new();
        let err = script.do_file("/nonexistent/script.lua").unwrap_err();
        assert!(err.to_string().starts_with("cannot open /nonexistent/script.lua"));
    }
}
