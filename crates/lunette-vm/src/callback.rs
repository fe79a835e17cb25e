//! Host functions callable from Lua.
//!
//! A callback receives an [`ExecutionContext`] and its arguments and answers
//! with a [`CallbackResult`]. Besides plain values it may ask the VM to
//! continue with a tail call (how `pcall` and `xpcall` run their callee
//! inside the dispatch loop) or to yield the running coroutine.

use crate::callinfo::Protection;
use crate::dispatch;
use crate::error::LuaError;
use crate::vm::Vm;
use lunette_core::gc::{GcIdx, NativeFunction};
use lunette_core::number::float_to_integer;
use lunette_core::string::StringId;
use lunette_core::table::Table;
use lunette_core::value::Value;
use std::rc::Rc;

/// Signature shared by every host function.
pub type CallbackFn =
    dyn Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<CallbackResult, LuaError>;

/// A registered host function.
pub struct Callback {
    pub name: String,
    pub func: Rc<CallbackFn>,
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback({})", self.name)
    }
}

/// What a callback hands back to the VM.
#[derive(Debug)]
pub enum CallbackResult {
    Values(Vec<Value>),
    /// Call `function` in place of the callback.
    TailCall(TailCallRequest),
    /// Suspend the running coroutine, handing these values to `resume`.
    Yield(Vec<Value>),
}

impl CallbackResult {
    pub fn none() -> Self {
        CallbackResult::Values(Vec::new())
    }

    pub fn one(v: Value) -> Self {
        CallbackResult::Values(vec![v])
    }
}

impl From<Vec<Value>> for CallbackResult {
    fn from(values: Vec<Value>) -> Self {
        CallbackResult::Values(values)
    }
}

#[derive(Debug)]
pub struct TailCallRequest {
    pub function: Value,
    pub args: Vec<Value>,
    /// Wrap the call in a protected-call layer.
    pub protection: Option<Protection>,
}

/// The VM as seen from inside a callback.
pub struct ExecutionContext<'a> {
    pub vm: &'a mut Vm,
    native: GcIdx<NativeFunction>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(vm: &'a mut Vm, native: GcIdx<NativeFunction>) -> Self {
        ExecutionContext { vm, native }
    }

    /// Name the function was registered under; used in argument errors.
    pub fn name(&self) -> String {
        self.vm.gc.get_native(self.native).name.clone()
    }

    /// Value bound to this function instance at creation.
    pub fn upvalue(&self, i: usize) -> Value {
        self.vm
            .gc
            .get_native(self.native)
            .upvalues
            .get(i)
            .copied()
            .unwrap_or_default()
    }

    // ---- Errors ----

    /// A runtime error located at the calling Lua frame.
    pub fn error(&mut self, msg: impl AsRef<str>) -> LuaError {
        self.vm.runtime_error(msg)
    }

    /// `bad argument #n to 'name' (msg)`. `index` is zero-based.
    pub fn arg_error(&mut self, index: usize, msg: impl AsRef<str>) -> LuaError {
        let text = format!(
            "bad argument #{} to '{}' ({})",
            index + 1,
            self.name(),
            msg.as_ref()
        );
        self.vm.runtime_error(text)
    }

    pub fn type_error(&mut self, args: &[Value], index: usize, expected: &str) -> LuaError {
        let got = match args.get(index) {
            Some(v) => self.vm.obj_type_name(*v),
            None => "no value".to_string(),
        };
        self.arg_error(index, format!("{expected} expected, got {got}"))
    }

    // ---- Argument checks ----

    pub fn arg(args: &[Value], index: usize) -> Value {
        args.get(index).copied().unwrap_or_default()
    }

    pub fn check_any(&mut self, args: &[Value], index: usize) -> Result<Value, LuaError> {
        match args.get(index) {
            Some(v) => Ok(*v),
            None => Err(self.arg_error(index, "value expected")),
        }
    }

    pub fn check_table(&mut self, args: &[Value], index: usize) -> Result<GcIdx<Table>, LuaError> {
        match args.get(index) {
            Some(Value::Table(t)) => Ok(*t),
            _ => Err(self.type_error(args, index, "table")),
        }
    }

    /// A number argument, with numeric strings converted.
    pub fn check_numeric(&mut self, args: &[Value], index: usize) -> Result<Value, LuaError> {
        let v = Self::arg(args, index);
        match crate::coerce::to_numeric(v, &self.vm.strings) {
            Some(n) => Ok(n),
            None => Err(self.type_error(args, index, "number")),
        }
    }

    pub fn check_number(&mut self, args: &[Value], index: usize) -> Result<f64, LuaError> {
        match self.check_numeric(args, index)? {
            Value::Integer(i) => Ok(i as f64),
            Value::Float(f) => Ok(f),
            _ => Err(self.type_error(args, index, "number")),
        }
    }

    pub fn check_integer(&mut self, args: &[Value], index: usize) -> Result<i64, LuaError> {
        match self.check_numeric(args, index)? {
            Value::Integer(i) => Ok(i),
            Value::Float(f) => float_to_integer(f)
                .ok_or_else(|| self.arg_error(index, "number has no integer representation")),
            _ => Err(self.type_error(args, index, "number")),
        }
    }

    pub fn opt_integer(&mut self, args: &[Value], index: usize, default: i64) -> Result<i64, LuaError> {
        match args.get(index) {
            None | Some(Value::Nil) => Ok(default),
            Some(_) => self.check_integer(args, index),
        }
    }

    /// A string argument; numbers are converted to their string form.
    pub fn check_string(&mut self, args: &[Value], index: usize) -> Result<StringId, LuaError> {
        let v = Self::arg(args, index);
        match crate::coerce::to_string_for_concat(v, &mut self.vm.strings) {
            Some(id) => Ok(id),
            None => Err(self.type_error(args, index, "string")),
        }
    }

    // ---- Calling back into Lua ----

    pub fn call(&mut self, func: Value, args: &[Value]) -> Result<Vec<Value>, LuaError> {
        dispatch::call_function(self.vm, func, args)
    }

    pub fn intern(&mut self, s: &str) -> Value {
        self.vm.intern(s)
    }

    pub fn tostring(&mut self, v: Value) -> Result<StringId, LuaError> {
        self.vm.tostring(v)
    }

    pub fn str(&self, id: StringId) -> std::borrow::Cow<'_, str> {
        self.vm.strings.get_str(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ctx<R>(f: impl FnOnce(&mut ExecutionContext<'_>) -> R) -> R {
        let mut vm = Vm::new();
        let func = vm.create_function("probe", |_, _| Ok(CallbackResult::none()));
        let Value::Native(idx) = func else {
            panic!("expected a native function")
        };
        let mut ctx = ExecutionContext::new(&mut vm, idx);
        f(&mut ctx)
    }

    #[test]
    fn test_type_error_wording() {
        with_ctx(|ctx| {
            let e = ctx.check_table(&[Value::Nil], 0).unwrap_err();
            assert_eq!(e.to_string(), "bad argument #1 to 'probe' (table expected, got nil)");
            let e = ctx.check_integer(&[], 1).unwrap_err();
            assert_eq!(e.to_string(), "bad argument #2 to 'probe' (number expected, got no value)");
        });
    }

    #[test]
    fn test_integer_coercions() {
        with_ctx(|ctx| {
            let s = ctx.intern("42");
            assert_eq!(ctx.check_integer(&[s], 0).unwrap(), 42);
            assert_eq!(ctx.check_integer(&[Value::Float(3.0)], 0).unwrap(), 3);
            let e = ctx.check_integer(&[Value::Float(3.5)], 0).unwrap_err();
            assert!(e.to_string().contains("number has no integer representation"));
            assert_eq!(ctx.opt_integer(&[Value::Nil], 0, 7).unwrap(), 7);
        });
    }

    #[test]
    fn test_numbers_pass_as_strings() {
        with_ctx(|ctx| {
            let id = ctx.check_string(&[Value::Integer(12)], 0).unwrap();
            assert_eq!(ctx.str(id), "12");
        });
    }
}
